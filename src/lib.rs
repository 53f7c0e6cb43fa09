//! Fiber Align - Dual-endpoint fiber coupling alignment.
//!
//! This crate maximizes the optical power coupled through a fiber whose two
//! endpoints (A and B) each sit on a five-axis stage. Both endpoints are
//! searched jointly by a dual-population genetic algorithm: one population
//! per endpoint, paired by index, scored by a single power measurement.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Search space, tunables, parameter updates and result types
//! - `compute`: The optimizer engine and a simulated coupling model
//!
//! # Example
//!
//! ```rust,no_run
//! use fiber_align::{
//!     compute::{CouplingModel, SimulatedCoupling},
//!     schema::OptimizerConfig,
//!     Optimizer,
//! };
//!
//! let config = OptimizerConfig::default();
//! let meter = SimulatedCoupling::new(CouplingModel::default(), &config.search_space);
//!
//! let mut optimizer = Optimizer::new(config, meter);
//! let result = optimizer.run_with_callback(|report| {
//!     println!("Generation {}: best {:.6}", report.generation, report.best_fitness);
//! });
//!
//! println!("Best pose: {}", result.best_pose);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::optimizer::{EvalError, FitnessEvaluator, Optimizer, OptimizerHandle};
pub use compute::{CouplingModel, SimulatedCoupling};
pub use schema::{OptimizationResult, OptimizerConfig, OptimizerEvent, Pose, SearchSpace, Tunables};
