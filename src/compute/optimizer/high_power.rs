//! High-power-keep mode.
//!
//! After convergence the optimum can drift (thermal expansion, mechanical
//! creep). This mode keeps a center pair and repopulates a narrow window
//! around it every generation, moving the center only toward higher readings
//! and adapting its own rates from how stable the readings are.

use crate::schema::{Bounds, EndpointSpace, HighPowerSettings, HighPowerStatus, Individual, SearchSpace};

use super::OptimizerError;
use super::operators::OperatorRng;
use super::population::{PopulationPair, best_index};

/// Number of recent best pairs considered when picking the initial center.
pub const RECENT_CENTER_CANDIDATES: usize = 3;

/// Readings below this fraction of the center fitness are flagged as drift.
pub const DRIFT_RATIO: f64 = 0.95;

/// Recent best pair and its fitness.
pub type BestPair = (Individual, Individual, f64);

/// Rate adaptation applied by one center update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateAdjustment {
    /// `true` when rates shrank after a stable stretch.
    pub stable: bool,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
}

/// What a call to [`HighPowerKeepMode::update_search_center`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CenterUpdate {
    pub improved: bool,
    pub adjustment: Option<RateAdjustment>,
    pub drift: bool,
}

/// Center-based search state.
#[derive(Debug, Clone)]
pub struct HighPowerKeepMode {
    settings: HighPowerSettings,
    center_a: Individual,
    center_b: Individual,
    center_fitness: f64,
    previous_fitness: Option<f64>,
    stable_count: usize,
    mutation_rate: f64,
    crossover_rate: f64,
}

impl HighPowerKeepMode {
    /// Create the mode around `(a, b)`.
    ///
    /// With at least three `recent` pairs the center becomes the fittest of the
    /// last three instead. `fitness` is kept as the center fitness either way.
    /// [`HistoryLog::recent_best_pairs`](crate::schema::HistoryLog::recent_best_pairs)
    /// yields `recent` in the expected order.
    pub fn new(
        settings: &HighPowerSettings,
        a: Individual,
        b: Individual,
        fitness: f64,
        recent: &[BestPair],
    ) -> Self {
        let (center_a, center_b) = if recent.len() >= RECENT_CENTER_CANDIDATES {
            let tail = &recent[recent.len() - RECENT_CENTER_CANDIDATES..];
            let mut pick = &tail[0];
            for candidate in &tail[1..] {
                if candidate.2 > pick.2 {
                    pick = candidate;
                }
            }
            (pick.0.clone(), pick.1.clone())
        } else {
            (a, b)
        };

        Self {
            mutation_rate: settings.mutation_rate,
            crossover_rate: settings.crossover_rate,
            settings: settings.clone(),
            center_a,
            center_b,
            center_fitness: fitness,
            previous_fitness: None,
            stable_count: 0,
        }
    }

    pub fn settings(&self) -> &HighPowerSettings {
        &self.settings
    }

    pub fn center(&self) -> (&[f64], &[f64]) {
        (&self.center_a, &self.center_b)
    }

    pub fn center_fitness(&self) -> f64 {
        self.center_fitness
    }

    /// Adapted mutation rate.
    pub fn mutation_rate(&self) -> f64 {
        self.mutation_rate
    }

    /// Adapted crossover rate.
    pub fn crossover_rate(&self) -> f64 {
        self.crossover_rate
    }

    pub fn population_size(&self) -> usize {
        self.settings.population_size
    }

    /// Take over updated settings. Adapted rates restart only when their base value was changed.
    pub fn sync_settings(&mut self, settings: &HighPowerSettings, applied: &[String]) {
        if applied.iter().any(|f| f == "high_power_mutation_rate") {
            self.mutation_rate = settings.mutation_rate;
        }
        if applied.iter().any(|f| f == "high_power_crossover_rate") {
            self.crossover_rate = settings.crossover_rate;
        }
        self.settings = settings.clone();
    }

    /// Local window of each selected variable around `center`, clipped to the true bounds.
    pub fn local_window(&self, space: &EndpointSpace, center: &[f64]) -> Vec<Bounds> {
        space
            .selected_bounds()
            .zip(center)
            .map(|(bounds, &c)| bounds.window_around(c, self.settings.search_range_percent))
            .collect()
    }

    fn perturbed(&self, rng: &mut OperatorRng, space: &EndpointSpace, center: &[f64], window: &[Bounds]) -> Individual {
        center
            .iter()
            .zip(space.selected_bounds())
            .zip(window)
            .map(|((&c, bounds), local)| {
                let step = rng.normal(self.settings.perturbation_strength * bounds.width());
                local.clamp(c + step)
            })
            .collect()
    }

    fn fill_around_center(&self, pair: &mut PopulationPair, space: &SearchSpace, rng: &mut OperatorRng) {
        let window_a = self.local_window(&space.a, &self.center_a);
        let window_b = self.local_window(&space.b, &self.center_b);
        while pair.len() < self.settings.population_size {
            let a = self.perturbed(rng, &space.a, &self.center_a, &window_a);
            let b = self.perturbed(rng, &space.b, &self.center_b, &window_b);
            pair.push(a, b);
        }
    }

    /// Perturbed clones of the center. With `include_center` index 0 is the center itself.
    pub fn create_initial_population(
        &self,
        space: &SearchSpace,
        rng: &mut OperatorRng,
        include_center: bool,
    ) -> PopulationPair {
        let mut pair = PopulationPair::with_capacity(self.settings.population_size);
        if include_center {
            pair.push(self.center_a.clone(), self.center_b.clone());
        }
        self.fill_around_center(&mut pair, space, rng);
        pair
    }

    /// Keep the single best pair, regenerate every other slot around the center.
    pub fn create_new_population(
        &self,
        current: &PopulationPair,
        fitness: &[f64],
        space: &SearchSpace,
        rng: &mut OperatorRng,
    ) -> Result<PopulationPair, OptimizerError> {
        let best = best_index(fitness)
            .filter(|&i| i < current.len())
            .ok_or(OptimizerError::EmptyPopulation)?;

        let mut pair = PopulationPair::with_capacity(self.settings.population_size);
        pair.push(current.a[best].clone(), current.b[best].clone());
        self.fill_around_center(&mut pair, space, rng);
        Ok(pair)
    }

    /// Record a generation's best pair.
    ///
    /// The center moves only on a strictly higher reading. Rates adapt from the
    /// relative change against the previous reading.
    pub fn update_search_center(&mut self, a: &[f64], b: &[f64], fitness: f64) -> CenterUpdate {
        let mut update = CenterUpdate::default();

        let change = self
            .previous_fitness
            .filter(|&previous| previous > 0.0)
            .map(|previous| (fitness - previous).abs() / previous);
        self.previous_fitness = Some(fitness);

        if fitness > self.center_fitness {
            self.center_fitness = fitness;
            self.center_a = a.to_vec();
            self.center_b = b.to_vec();
            update.improved = true;
        }

        if let Some(change) = change.filter(|&c| c != 0.0) {
            let s = &self.settings;
            if change < s.convergence_threshold {
                self.stable_count += 1;
                if self.stable_count >= s.stable_generations {
                    self.mutation_rate = (self.mutation_rate * (1.0 - s.adjustment_rate)).max(s.min_mutation_rate);
                    self.crossover_rate = (self.crossover_rate * (1.0 - s.adjustment_rate)).max(s.min_crossover_rate);
                    update.adjustment = Some(RateAdjustment {
                        stable: true,
                        mutation_rate: self.mutation_rate,
                        crossover_rate: self.crossover_rate,
                    });
                }
            } else {
                self.stable_count = 0;
                self.mutation_rate = (self.mutation_rate * (1.0 + s.adjustment_rate)).min(s.max_mutation_rate);
                self.crossover_rate = (self.crossover_rate * (1.0 + s.adjustment_rate)).min(s.max_crossover_rate);
                update.adjustment = Some(RateAdjustment {
                    stable: false,
                    mutation_rate: self.mutation_rate,
                    crossover_rate: self.crossover_rate,
                });
                update.drift = fitness < self.center_fitness * DRIFT_RATIO;
            }
        }

        update
    }

    pub fn status(&self) -> HighPowerStatus {
        HighPowerStatus {
            center_a: self.center_a.clone(),
            center_b: self.center_b.clone(),
            center_fitness: self.center_fitness,
            mutation_rate: self.mutation_rate,
            crossover_rate: self.crossover_rate,
            stable_count: self.stable_count,
            population_size: self.settings.population_size,
        }
    }
}
