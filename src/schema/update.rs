//! Field-by-field updates of [`Tunables`] from loosely typed parameter maps.
//!
//! Every tunable is declared once in the `tunable_fields!` table below with
//! its external key and its validation rule. The same table drives partial
//! updates, construction-time validation and read-back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::config::Tunables;

/// Validation rule attached to a tunable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRule {
    /// Probability in `[0, 1]`.
    Rate,
    /// Inclusive range.
    Range { min: f64, max: f64 },
    /// Integer count in an inclusive range. The maximum caps allocations.
    Count { min: usize, max: usize },
    /// Any finite value `>= 0`.
    NonNegative,
}

impl FieldRule {
    fn check(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() {
            return Err(format!("{value} is not a finite number"));
        }
        match *self {
            FieldRule::Rate if !(0.0..=1.0).contains(&value) => {
                Err(format!("{value} is outside [0, 1]"))
            }
            FieldRule::Range { min, max } if value < min || value > max => {
                Err(format!("{value} is outside [{min}, {max}]"))
            }
            FieldRule::Count { min, max } if value < min as f64 || value > max as f64 => {
                Err(format!("{value} is outside [{min}, {max}]"))
            }
            FieldRule::NonNegative if value < 0.0 => Err(format!("{value} is negative")),
            _ => Ok(()),
        }
    }
}

/// External key and rule of one tunable.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub rule: FieldRule,
}

/// Mutable view of a single tunable slot.
pub enum SlotMut<'a> {
    Float(&'a mut f64),
    Count(&'a mut usize),
}

impl<'a> From<&'a mut f64> for SlotMut<'a> {
    fn from(slot: &'a mut f64) -> Self {
        SlotMut::Float(slot)
    }
}

impl<'a> From<&'a mut usize> for SlotMut<'a> {
    fn from(slot: &'a mut usize) -> Self {
        SlotMut::Count(slot)
    }
}

/// Read-only view of a tunable slot as `f64`.
trait SlotValue {
    fn as_f64(&self) -> f64;
}

impl SlotValue for f64 {
    fn as_f64(&self) -> f64 {
        *self
    }
}

impl SlotValue for usize {
    fn as_f64(&self) -> f64 {
        *self as f64
    }
}

/// Upper limit for population sizes.
pub const MAX_POPULATION: usize = 10_000;

macro_rules! tunable_fields {
    ($($key:literal => $($path:ident).+ : $rule:expr),* $(,)?) => {
        /// All updatable tunables, in declaration order.
        pub const FIELDS: &[FieldSpec] = &[$(FieldSpec { name: $key, rule: $rule }),*];

        impl Tunables {
            /// Mutable slot for an external key, `None` for unknown keys.
            pub fn slot_mut(&mut self, name: &str) -> Option<SlotMut<'_>> {
                match name {
                    $($key => Some(SlotMut::from(&mut self.$($path).+)),)*
                    _ => None,
                }
            }

            /// Current value of a tunable by external key.
            pub fn current(&self, name: &str) -> Option<f64> {
                match name {
                    $($key => Some(SlotValue::as_f64(&self.$($path).+)),)*
                    _ => None,
                }
            }
        }
    };
}

tunable_fields! {
    "population_size" => population_size: FieldRule::Count { min: 5, max: MAX_POPULATION },
    "elite_size" => elite_size: FieldRule::Count { min: 1, max: MAX_POPULATION },
    "tournament_size" => tournament_size: FieldRule::Count { min: 2, max: MAX_POPULATION },
    "gene_mutation_rate" => gene_mutation_rate: FieldRule::Rate,
    "gene_crossover_rate" => gene_crossover_rate: FieldRule::Rate,
    "chromosome_crossover_rate" => chromosome_crossover_rate: FieldRule::Rate,
    "convergence_threshold" => convergence_threshold: FieldRule::Range { min: 0.001, max: 0.5 },
    "enhanced_exploration_max" => enhanced_exploration_max: FieldRule::Count { min: 1, max: 100 },
    "enhanced_mutation_rate" => enhanced_mutation_rate: FieldRule::Rate,
    "light_threshold" => light_threshold: FieldRule::NonNegative,
    "lock_mode_threshold" => lock_mode_threshold: FieldRule::Range { min: 0.0001, max: 0.1 },
    "high_power_population_size" => high_power.population_size: FieldRule::Count { min: 5, max: MAX_POPULATION },
    "high_power_mutation_rate" => high_power.mutation_rate: FieldRule::Rate,
    "high_power_crossover_rate" => high_power.crossover_rate: FieldRule::Rate,
    "high_power_chromosome_crossover_rate" => high_power.chromosome_crossover_rate: FieldRule::Rate,
    "high_power_search_range_percent" => high_power.search_range_percent: FieldRule::Range { min: 0.001, max: 0.2 },
    "high_power_perturbation_strength" => high_power.perturbation_strength: FieldRule::Range { min: 0.0, max: 0.1 },
    "high_power_convergence_threshold" => high_power.convergence_threshold: FieldRule::Range { min: 0.001, max: 0.1 },
    "high_power_stable_generations" => high_power.stable_generations: FieldRule::Count { min: 1, max: 1_000 },
    "param_adjustment_rate" => high_power.adjustment_rate: FieldRule::Range { min: 0.1, max: 1.0 },
    "min_mutation_rate" => high_power.min_mutation_rate: FieldRule::Range { min: 0.0, max: 0.1 },
    "max_mutation_rate" => high_power.max_mutation_rate: FieldRule::Range { min: 0.1, max: 1.0 },
    "min_crossover_rate" => high_power.min_crossover_rate: FieldRule::Range { min: 0.0, max: 0.5 },
    "max_crossover_rate" => high_power.max_crossover_rate: FieldRule::Range { min: 0.5, max: 1.0 },
}

/// Rejection of a single field in a parameter update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Applied and rejected fields of one update.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub applied: Vec<String>,
    pub rejected: Vec<FieldError>,
}

/// Numbers are accepted as JSON numbers or numeric strings.
fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Tunables {
    fn apply_field(&mut self, name: &str, value: &Value) -> Result<(), FieldError> {
        let rule = FIELDS
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.rule)
            .ok_or_else(|| FieldError::new(name, "unknown parameter"))?;
        let number = parse_number(value)
            .ok_or_else(|| FieldError::new(name, format!("{value} is not a number")))?;
        rule.check(number).map_err(|reason| FieldError::new(name, reason))?;

        match self.slot_mut(name) {
            Some(SlotMut::Float(slot)) => *slot = number,
            Some(SlotMut::Count(slot)) => {
                if number.fract() != 0.0 {
                    return Err(FieldError::new(name, format!("{number} is not an integer")));
                }
                *slot = number as usize;
            }
            None => return Err(FieldError::new(name, "unknown parameter")),
        }
        Ok(())
    }

    /// Apply every valid field of `partial`, keeping prior values for the rest.
    pub fn apply_fields(&mut self, partial: &Map<String, Value>) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        for (name, value) in partial {
            match self.apply_field(name, value) {
                Ok(()) => outcome.applied.push(name.clone()),
                Err(err) => {
                    log::warn!("Rejected parameter {err}");
                    outcome.rejected.push(err);
                }
            }
        }
        outcome
    }

    /// Apply a partial update.
    ///
    /// Valid fields are applied even when others are rejected; the error
    /// lists only the rejected ones.
    pub fn apply_update(&mut self, partial: &Map<String, Value>) -> Result<usize, Vec<FieldError>> {
        let outcome = self.apply_fields(partial);
        if outcome.rejected.is_empty() {
            Ok(outcome.applied.len())
        } else {
            Err(outcome.rejected)
        }
    }

    /// Check every field against its rule.
    pub fn validate(&self) -> Result<(), FieldError> {
        for field in FIELDS {
            if let Some(value) = self.current(field.name) {
                field.rule
                    .check(value)
                    .map_err(|reason| FieldError::new(field.name, reason))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_every_field_has_a_slot() {
        let mut tunables = Tunables::default();
        for field in FIELDS {
            assert!(tunables.current(field.name).is_some(), "{}", field.name);
            assert!(tunables.slot_mut(field.name).is_some(), "{}", field.name);
        }
        assert!(tunables.validate().is_ok());
    }

    #[test]
    fn test_apply_valid_update() {
        let mut tunables = Tunables::default();
        let applied = tunables
            .apply_update(&map(json!({
                "population_size": 40,
                "gene_mutation_rate": "0.25",
                "high_power_search_range_percent": 0.1,
            })))
            .unwrap();

        assert_eq!(applied, 3);
        assert_eq!(tunables.population_size, 40);
        assert_eq!(tunables.gene_mutation_rate, 0.25);
        assert_eq!(tunables.high_power.search_range_percent, 0.1);
    }

    #[test]
    fn test_rejects_per_field_and_keeps_prior_values() {
        let mut tunables = Tunables::default();
        let errors = tunables
            .apply_update(&map(json!({
                "population_size": 3,
                "gene_mutation_rate": 1.5,
                "lock_mode_threshold": 0.5,
                "tournament_size": 2.5,
                "no_such_field": 1,
                "elite_size": "many",
                "gene_crossover_rate": 0.6,
            })))
            .unwrap_err();

        let mut rejected: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        rejected.sort();
        assert_eq!(
            rejected,
            vec![
                "elite_size",
                "gene_mutation_rate",
                "lock_mode_threshold",
                "no_such_field",
                "population_size",
                "tournament_size",
            ]
        );

        let defaults = Tunables::default();
        assert_eq!(tunables.population_size, defaults.population_size);
        assert_eq!(tunables.gene_mutation_rate, defaults.gene_mutation_rate);
        assert_eq!(tunables.tournament_size, defaults.tournament_size);
        // Valid field in the same update still lands.
        assert_eq!(tunables.gene_crossover_rate, 0.6);
    }

    #[test]
    fn test_rejects_oversized_counts() {
        let mut tunables = Tunables::default();
        let errors = tunables
            .apply_update(&map(json!({
                "population_size": 1e19,
                "high_power_population_size": MAX_POPULATION + 1,
                "high_power_stable_generations": 1_000,
            })))
            .unwrap_err();

        let rejected: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.contains(&"population_size"));
        assert!(rejected.contains(&"high_power_population_size"));
        assert_eq!(tunables.population_size, 30);
        assert_eq!(tunables.high_power.population_size, 20);
        assert_eq!(tunables.high_power.stable_generations, 1_000);

        tunables.population_size = MAX_POPULATION + 1;
        assert_eq!(tunables.validate().unwrap_err().field, "population_size");
    }

    #[test]
    fn test_validate_reports_field() {
        let mut tunables = Tunables::default();
        tunables.high_power.perturbation_strength = 0.5;
        let err = tunables.validate().unwrap_err();
        assert_eq!(err.field, "high_power_perturbation_strength");
    }
}
