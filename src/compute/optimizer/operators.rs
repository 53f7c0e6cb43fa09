//! Genetic operators over real-valued endpoint individuals.
//!
//! Provides random generation, tournament selection, gene and chromosome
//! crossover, and Gaussian mutation with clipping.

use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::schema::{Bounds, EndpointSpace, Individual, SearchSpace};

use super::OptimizerError;
use super::population::{PopulationPair, ranked_indices};

/// Mutation standard deviation as a fraction of the variable's bound width.
pub const MUTATION_SCALE: f64 = 0.1;

/// Random number generator wrapper for operator draws.
pub struct OperatorRng {
    rng: StdRng,
}

impl OperatorRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Bernoulli draw with probability `p`.
    #[inline]
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.r#gen::<f64>() < p
    }

    /// Uniform draw inside `bounds`.
    pub fn uniform(&mut self, bounds: Bounds) -> f64 {
        if bounds.width() <= 0.0 {
            return bounds.lower;
        }
        self.rng.gen_range(bounds.lower..=bounds.upper)
    }

    /// Zero-mean Gaussian draw.
    pub fn normal(&mut self, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * std_dev
    }

    /// Uniformly random individual over the selected variables of one endpoint.
    pub fn random_individual(&mut self, space: &EndpointSpace) -> Individual {
        space.selected_bounds().map(|b| self.uniform(b)).collect()
    }

    /// Draw `k` distinct indices and return the one with the highest fitness.
    ///
    /// Ties resolve to the earliest drawn index.
    pub fn tournament_select(&mut self, fitness: &[f64], k: usize) -> Result<usize, OptimizerError> {
        if fitness.is_empty() {
            return Err(OptimizerError::EmptyPopulation);
        }
        if k == 0 || k > fitness.len() {
            return Err(OptimizerError::InvalidTournament {
                size: k,
                population: fitness.len(),
            });
        }

        let mut winner = None;
        for idx in rand::seq::index::sample(&mut self.rng, fitness.len(), k) {
            match winner {
                Some(best) if fitness[idx] <= fitness[best] => {}
                _ => winner = Some(idx),
            }
        }
        winner.ok_or(OptimizerError::EmptyPopulation)
    }

    /// Arithmetic blend per component with independent 50% probability.
    pub fn gene_crossover(&mut self, p1: &[f64], p2: &[f64]) -> (Individual, Individual) {
        let mut c1 = p1.to_vec();
        let mut c2 = p2.to_vec();

        for i in 0..p1.len().min(p2.len()) {
            if self.chance(0.5) {
                let alpha: f64 = self.rng.r#gen();
                c1[i] = alpha * p1[i] + (1.0 - alpha) * p2[i];
                c2[i] = alpha * p2[i] + (1.0 - alpha) * p1[i];
            }
        }

        (c1, c2)
    }

    /// Per component with probability `rate`, add `N(0, 0.1 × width)` and clip.
    pub fn mutate(&mut self, individual: &mut [f64], space: &EndpointSpace, rate: f64) {
        for (value, bounds) in individual.iter_mut().zip(space.selected_bounds()) {
            if self.chance(rate) {
                *value = bounds.clamp(*value + self.normal(bounds.width() * MUTATION_SCALE));
            }
        }
    }
}

/// Swap the B chromosomes of two parent pairs.
///
/// Returns `((A1, B2), (A2, B1))`.
pub fn chromosome_crossover(
    a1: &[f64],
    b1: &[f64],
    a2: &[f64],
    b2: &[f64],
) -> ((Individual, Individual), (Individual, Individual)) {
    ((a1.to_vec(), b2.to_vec()), (a2.to_vec(), b1.to_vec()))
}

/// Rates and sizes used to breed one generation.
#[derive(Debug, Clone, Copy)]
pub struct BreedingParams {
    pub population_size: usize,
    pub elite_size: usize,
    pub tournament_size: usize,
    pub mutation_rate: f64,
    pub gene_crossover_rate: f64,
    pub chromosome_crossover_rate: f64,
}

impl OperatorRng {
    /// Produce the next generation from an evaluated population pair.
    ///
    /// Elites are copied unchanged; the rest is filled two children at a time.
    /// The output always holds exactly `params.population_size` pairs.
    pub fn breed(
        &mut self,
        current: &PopulationPair,
        fitness: &[f64],
        space: &SearchSpace,
        params: &BreedingParams,
    ) -> Result<PopulationPair, OptimizerError> {
        if current.is_empty() || fitness.len() != current.len() {
            return Err(OptimizerError::EmptyPopulation);
        }
        let size = params.population_size;
        let tournament = params.tournament_size.min(current.len());
        let mut next = PopulationPair::with_capacity(size);

        for &idx in ranked_indices(fitness).iter().take(params.elite_size.min(size)) {
            next.push(current.a[idx].clone(), current.b[idx].clone());
        }

        while next.len() < size {
            let i1 = self.tournament_select(fitness, tournament)?;
            let i2 = self.tournament_select(fitness, tournament)?;

            let ((mut a1, mut b1), (mut a2, mut b2)) = if self.chance(params.chromosome_crossover_rate) {
                chromosome_crossover(&current.a[i1], &current.b[i1], &current.a[i2], &current.b[i2])
            } else {
                (
                    (current.a[i1].clone(), current.b[i1].clone()),
                    (current.a[i2].clone(), current.b[i2].clone()),
                )
            };

            if self.chance(params.gene_crossover_rate) {
                (a1, a2) = self.gene_crossover(&a1, &a2);
                (b1, b2) = self.gene_crossover(&b1, &b2);
            }

            self.mutate(&mut a1, &space.a, params.mutation_rate);
            self.mutate(&mut a2, &space.a, params.mutation_rate);
            self.mutate(&mut b1, &space.b, params.mutation_rate);
            self.mutate(&mut b2, &space.b, params.mutation_rate);

            next.push(a1, b1);
            if next.len() < size {
                next.push(a2, b2);
            }
        }

        Ok(next)
    }
}
