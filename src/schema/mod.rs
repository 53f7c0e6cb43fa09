//! Schema module - Configuration, parameter update and report types for the
//! alignment optimizer.

mod config;
mod report;
mod update;

pub use config::*;
pub use report::*;
pub use update::*;
