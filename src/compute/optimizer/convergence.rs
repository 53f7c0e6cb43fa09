//! Local/global convergence detection and the enhanced-exploration escape.

use std::collections::VecDeque;

/// Number of generation bests compared by the detector.
pub const WINDOW: usize = 3;

/// Relative improvement over the exploration entry fitness that ends exploration.
pub const EXPLORATION_IMPROVEMENT: f64 = 0.05;

/// Relative spread `(max − min) / max` of a window, `1.0` when `max <= 0`.
pub fn window_change(window: &[f64]) -> f64 {
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    if max > 0.0 { (max - min) / max } else { 1.0 }
}

/// Outcome of observing one generation best.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvergenceVerdict {
    /// Nothing changes.
    Continue,
    /// Start (or restart) enhanced exploration as the given round.
    EnterExploration { round: usize },
    /// Exploration found a better region; resume normal search.
    ExplorationImproved { improvement: f64 },
    /// The run has converged globally.
    Global,
}

/// Sliding-window detector driving enhanced exploration.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceDetector {
    window: VecDeque<f64>,
    /// Every detection event, including detections during exploration.
    local_convergence_count: usize,
    exploration_rounds: usize,
}

impl ConvergenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of detection events so far, whether searching or exploring.
    pub fn local_convergence_count(&self) -> usize {
        self.local_convergence_count
    }

    pub fn exploration_rounds(&self) -> usize {
        self.exploration_rounds
    }

    /// Current relative spread, `None` until the window is full.
    pub fn change(&self) -> Option<f64> {
        if self.window.len() < WINDOW {
            return None;
        }
        let (head, tail) = self.window.as_slices();
        let values: Vec<f64> = head.iter().chain(tail).copied().collect();
        Some(window_change(&values))
    }

    /// Record `best` and decide the next step.
    ///
    /// `exploring_since` carries the entry fitness while enhanced exploration
    /// is active. The window restarts whenever exploration starts or ends.
    pub fn observe(
        &mut self,
        best: f64,
        exploring_since: Option<f64>,
        threshold: f64,
        max_rounds: usize,
    ) -> ConvergenceVerdict {
        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(best);

        if let Some(entry) = exploring_since {
            let improvement = if entry > 0.0 { (best - entry) / entry } else { 0.0 };
            if improvement > EXPLORATION_IMPROVEMENT {
                self.window.clear();
                return ConvergenceVerdict::ExplorationImproved { improvement };
            }
        }

        let converged = self.change().is_some_and(|change| change < threshold);
        if !converged {
            return ConvergenceVerdict::Continue;
        }

        self.local_convergence_count += 1;
        self.window.clear();

        let may_explore = match exploring_since {
            Some(_) => self.exploration_rounds < max_rounds,
            None => self.local_convergence_count <= max_rounds,
        };
        if may_explore {
            self.exploration_rounds += 1;
            ConvergenceVerdict::EnterExploration {
                round: self.exploration_rounds,
            }
        } else {
            ConvergenceVerdict::Global
        }
    }
}
