//! Dual-population genetic optimizer for two-endpoint fiber alignment.
//!
//! # Overview
//!
//! - **Operators** (`operators`): tournament selection, gene and chromosome
//!   crossover, Gaussian mutation
//! - **Populations** (`population`): index-aligned A/B populations and statistics
//! - **Convergence** (`convergence`): sliding-window detector and enhanced exploration
//! - **Position lock** (`lock`): freezes the run near a remembered best
//! - **High-power keep** (`high_power`): drift-following center search
//! - **Engine** (`engine`): the generation loop and phase transitions
//! - **Archive** (`archive`): JSON export of results
//!
//! # Example
//!
//! ```rust,no_run
//! use fiber_align::compute::optimizer::{EvalError, Optimizer};
//! use fiber_align::schema::{OptimizerConfig, Pose};
//!
//! let evaluator = |pose: &Pose| -> Result<f64, EvalError> {
//!     Ok((-(pose.a.x - 15.0).powi(2)).exp())
//! };
//! let mut optimizer = Optimizer::new(OptimizerConfig::default(), evaluator);
//! let events = optimizer.subscribe();
//! let result = optimizer.run();
//!
//! println!("Best power: {:.6} at {}", result.best_fitness, result.best_pose);
//! println!("Events emitted: {}", events.try_iter().count());
//! ```

mod archive;
mod convergence;
mod engine;
mod events;
mod fitness;
mod high_power;
mod lock;
mod operators;
mod population;

pub use archive::{ArchiveError, default_file_name, load_result, save_result, save_result_in};
pub use convergence::{ConvergenceDetector, ConvergenceVerdict, window_change};
pub use engine::Optimizer;
pub use events::{Control, EventSink, OptimizerHandle, ParameterSource};
pub use fitness::{EvalError, FitnessEvaluator, read_power};
pub use high_power::{BestPair, CenterUpdate, HighPowerKeepMode, RateAdjustment};
pub use lock::PositionLock;
pub use operators::{BreedingParams, OperatorRng, chromosome_crossover};
pub use population::{Population, PopulationPair, best_index, diversity, ranked_indices};

use crate::schema::{ConfigError, Endpoint, OptimizerPhase};

/// Run-fatal optimizer errors. They end the run with a failure result.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Population is empty")]
    EmptyPopulation,
    #[error("Tournament size {size} is invalid for population size {population}")]
    InvalidTournament { size: usize, population: usize },
    #[error("No measured position available yet")]
    NoMeasurement,
    #[error("Center for endpoint {endpoint:?} has {found} values, expected {expected}")]
    CenterDimension {
        endpoint: Endpoint,
        expected: usize,
        found: usize,
    },
    #[error("Cannot {action} while {phase}")]
    PhaseConflict {
        action: &'static str,
        phase: OptimizerPhase,
    },
}
