//! Progress, history and result types emitted by the optimizer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::{Individual, Pose};

/// Phase of the optimizer. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerPhase {
    /// Regular dual-population search.
    #[default]
    Searching,
    /// Temporary mutation boost after a local convergence.
    EnhancedExploration,
    /// Globally converged, waiting for a reading close to the remembered best.
    GlobalConvergedAwaitingLock,
    /// Position frozen.
    Locked,
    /// Center-based search that follows a drifting optimum.
    HighPowerKeep,
}

impl OptimizerPhase {
    pub fn label(self) -> &'static str {
        match self {
            OptimizerPhase::Searching => "searching",
            OptimizerPhase::EnhancedExploration => "enhanced exploration",
            OptimizerPhase::GlobalConvergedAwaitingLock => "awaiting lock",
            OptimizerPhase::Locked => "locked",
            OptimizerPhase::HighPowerKeep => "high-power keep",
        }
    }
}

impl fmt::Display for OptimizerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-generation history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    /// Mean per-variable standard deviation of population A.
    pub diversity_a: f64,
    /// Mean per-variable standard deviation of population B.
    pub diversity_b: f64,
    /// Mutation rate used to breed the next generation.
    pub mutation_rate: f64,
    pub phase: OptimizerPhase,
    pub best_a: Individual,
    pub best_b: Individual,
}

/// Discrete events recorded alongside the generation records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEvent {
    ExplorationStarted {
        generation: usize,
        round: usize,
        entry_fitness: f64,
        mutation_rate: f64,
    },
    ExplorationEnded {
        generation: usize,
        improvement: f64,
    },
    GlobalConvergence {
        generation: usize,
        best_fitness: f64,
        local_convergence_count: usize,
    },
    LockArmed {
        generation: usize,
        reference: f64,
    },
    PositionLocked {
        generation: usize,
        fitness: f64,
        deviation: f64,
    },
    HighPowerEntered {
        generation: usize,
        center_fitness: f64,
        explicit: bool,
    },
    CenterImproved {
        generation: usize,
        fitness: f64,
    },
    RatesAdjusted {
        generation: usize,
        mutation_rate: f64,
        crossover_rate: f64,
        stable: bool,
    },
    PossibleDrift {
        generation: usize,
        fitness: f64,
        center_fitness: f64,
    },
    ParametersUpdated {
        generation: usize,
        fields: Vec<String>,
    },
}

/// Append-only run history.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryLog {
    pub records: Vec<GenerationRecord>,
    pub events: Vec<HistoryEvent>,
}

impl HistoryLog {
    /// Best fitness per generation.
    pub fn best_fitness(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.best_fitness).collect()
    }

    /// Last `n` generation-best pairs, oldest first.
    ///
    /// This is the `recent` input of `Optimizer::enter_enhanced_high_power_mode`.
    pub fn recent_best_pairs(&self, n: usize) -> Vec<(Individual, Individual, f64)> {
        let start = self.records.len().saturating_sub(n);
        self.records[start..]
            .iter()
            .map(|r| (r.best_a.clone(), r.best_b.clone(), r.best_fitness))
            .collect()
    }
}

/// Position captured when the lock fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockSnapshot {
    pub a: Individual,
    pub b: Individual,
    pub pose: Pose,
    pub fitness: f64,
    /// Fitness the lock compared against.
    pub reference: f64,
    pub deviation: f64,
    pub generation: usize,
}

/// Live state of high-power-keep mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HighPowerStatus {
    pub center_a: Individual,
    pub center_b: Individual,
    pub center_fitness: f64,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub stable_count: usize,
    pub population_size: usize,
}

/// Reason the run ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Stop requested.
    Cancelled,
    /// Position lock fired.
    Locked,
    /// Run-fatal fault.
    Error(String),
}

// ============================================================================
// Progress and Result Types
// ============================================================================

/// Progress of one completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Zero-based generation index.
    pub generation: usize,
    pub total_generations: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    /// Best fitness seen in the whole run.
    pub best_ever_fitness: f64,
    pub best_pose: Pose,
    pub phase: OptimizerPhase,
    pub mutation_rate: f64,
    pub evaluations: u64,
    pub light_detected: bool,
    pub global_converged: bool,
    pub local_convergence_count: usize,
    pub high_power: Option<HighPowerStatus>,
}

/// Final result of an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    /// Message of the run-fatal fault, if any.
    pub error: Option<String>,
    pub best_fitness: f64,
    pub best_a: Individual,
    pub best_b: Individual,
    pub best_pose: Pose,
    pub generations: usize,
    pub evaluations: u64,
    pub elapsed_seconds: f64,
    pub final_phase: OptimizerPhase,
    pub stop_reason: StopReason,
    pub light_detected: bool,
    pub global_converged: bool,
    pub local_convergence_count: usize,
    pub position_locked: bool,
    pub high_power_active: bool,
    pub lock: Option<LockSnapshot>,
    pub high_power: Option<HighPowerStatus>,
    /// Mutation rate in effect at the end of the run.
    pub final_mutation_rate: f64,
    pub final_crossover_rate: f64,
    pub history: HistoryLog,
}

/// Tagged notification sent to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OptimizerEvent {
    Evaluation {
        count: u64,
        power: f64,
        pose: Pose,
        phase: OptimizerPhase,
    },
    Generation(GenerationReport),
    ParametersUpdated {
        fields: Vec<String>,
        count: usize,
    },
    ExplorationStarted {
        generation: usize,
        round: usize,
    },
    ExplorationEnded {
        generation: usize,
        improvement: f64,
    },
    GlobalConvergenceDetected {
        generation: usize,
        best: f64,
    },
    LockArmed {
        reference: f64,
    },
    PositionLocked {
        pose: Pose,
        fitness: f64,
    },
    HighPowerModeEntered {
        params: HighPowerStatus,
    },
    PossibleDrift {
        fitness: f64,
        center_fitness: f64,
    },
    Completed {
        success: bool,
        best_fitness: f64,
        stop_reason: StopReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(generation: usize, best: f64) -> GenerationRecord {
        GenerationRecord {
            generation,
            best_fitness: best,
            avg_fitness: best / 2.0,
            diversity_a: 0.0,
            diversity_b: 0.0,
            mutation_rate: 0.15,
            phase: OptimizerPhase::Searching,
            best_a: vec![generation as f64],
            best_b: vec![],
        }
    }

    #[test]
    fn test_recent_best_pairs() {
        let log = HistoryLog {
            records: (0..5).map(|g| record(g, g as f64)).collect(),
            events: Vec::new(),
        };
        let recent = log.recent_best_pairs(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].0, vec![2.0]);
        assert_eq!(recent[2].2, 4.0);
        assert_eq!(log.recent_best_pairs(10).len(), 5);
    }

    #[test]
    fn test_event_tagging() {
        let event = OptimizerEvent::GlobalConvergenceDetected {
            generation: 12,
            best: 3.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "global_convergence_detected");
        assert_eq!(json["generation"], 12);
    }
}
