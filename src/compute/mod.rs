//! Compute module - Optimizer engine and the simulated coupling model.

pub mod optimizer;
mod simulated;

pub use simulated::*;
