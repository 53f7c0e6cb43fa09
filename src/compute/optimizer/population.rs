//! Paired A/B populations and population statistics.

use std::cmp::Ordering;

use crate::schema::{Individual, SearchSpace};

use super::OptimizerError;
use super::operators::OperatorRng;

/// Population of one endpoint.
pub type Population = Vec<Individual>;

/// Index-aligned A and B populations; pair `i` is `(a[i], b[i])`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationPair {
    pub a: Population,
    pub b: Population,
}

impl PopulationPair {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            a: Vec::with_capacity(size),
            b: Vec::with_capacity(size),
        }
    }

    /// Uniform random pair population.
    pub fn initialize(
        space: &SearchSpace,
        size: usize,
        rng: &mut OperatorRng,
    ) -> Result<Self, OptimizerError> {
        if size < 1 {
            return Err(OptimizerError::EmptyPopulation);
        }
        let mut pair = Self::with_capacity(size);
        for _ in 0..size {
            let a = rng.random_individual(&space.a);
            let b = rng.random_individual(&space.b);
            pair.push(a, b);
        }
        Ok(pair)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.a.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn push(&mut self, a: Individual, b: Individual) {
        self.a.push(a);
        self.b.push(b);
    }

    /// Individuals of pair `index`.
    pub fn pair(&self, index: usize) -> (&[f64], &[f64]) {
        (&self.a[index], &self.b[index])
    }

    /// Whether every individual lies inside the search space.
    pub fn within(&self, space: &SearchSpace) -> bool {
        self.a.iter().all(|ind| space.a.contains(ind)) && self.b.iter().all(|ind| space.b.contains(ind))
    }
}

fn by_fitness_desc(fitness: &[f64]) -> impl Fn(&usize, &usize) -> Ordering + '_ {
    |&i, &j| fitness[j].partial_cmp(&fitness[i]).unwrap_or(Ordering::Equal)
}

/// Indices sorted by descending fitness; equal fitness keeps index order.
pub fn ranked_indices(fitness: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..fitness.len()).collect();
    indices.sort_by(by_fitness_desc(fitness));
    indices
}

/// Index of the first maximum.
pub fn best_index(fitness: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &f) in fitness.iter().enumerate() {
        if best.is_none_or(|b| f > fitness[b]) {
            best = Some(i);
        }
    }
    best
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Mean per-variable standard deviation of a population.
pub fn diversity(population: &[Individual]) -> f64 {
    let Some(dimension) = population.first().map(Vec::len) else {
        return 0.0;
    };
    if population.len() < 2 || dimension == 0 {
        return 0.0;
    }

    let n = population.len() as f64;
    let total: f64 = (0..dimension)
        .map(|j| {
            let column_mean = population.iter().map(|ind| ind[j]).sum::<f64>() / n;
            let variance = population
                .iter()
                .map(|ind| (ind[j] - column_mean).powi(2))
                .sum::<f64>()
                / n;
            variance.sqrt()
        })
        .sum();
    total / dimension as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_within_bounds() {
        let space = SearchSpace::default();
        let mut rng = OperatorRng::new(1);
        let pair = PopulationPair::initialize(&space, 25, &mut rng).unwrap();
        assert_eq!(pair.len(), 25);
        assert_eq!(pair.b.len(), 25);
        assert!(pair.within(&space));
    }

    #[test]
    fn test_initialize_rejects_empty() {
        let mut rng = OperatorRng::new(1);
        assert!(PopulationPair::initialize(&SearchSpace::default(), 0, &mut rng).is_err());
    }

    #[test]
    fn test_ranking() {
        let fitness = [0.5, 2.0, 1.0, 2.0];
        assert_eq!(ranked_indices(&fitness), vec![1, 3, 2, 0]);
        assert_eq!(best_index(&fitness), Some(1));
        assert_eq!(best_index(&[]), None);
    }

    #[test]
    fn test_diversity() {
        let same = vec![vec![1.0, 2.0]; 4];
        assert_eq!(diversity(&same), 0.0);

        let spread = vec![vec![0.0, 0.0], vec![2.0, 4.0]];
        // std of column 0 is 1, column 1 is 2.
        assert!((diversity(&spread) - 1.5).abs() < 1e-12);
        assert_eq!(diversity(&[]), 0.0);
    }
}
