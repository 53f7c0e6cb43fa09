//! Configuration types for the dual-endpoint alignment optimizer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One candidate position for a single endpoint.
///
/// Holds one value per selected variable, in the endpoint's selection order.
pub type Individual = Vec<f64>;

/// Fiber endpoint being positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    A,
    B,
}

impl Endpoint {
    /// Key prefix used in pose dictionaries.
    pub fn prefix(self) -> &'static str {
        match self {
            Endpoint::A => "A",
            Endpoint::B => "B",
        }
    }
}

/// A positioning axis of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    Rx,
    Ry,
}

impl Axis {
    /// All axes in canonical order.
    pub const ALL: [Axis; 5] = [Axis::X, Axis::Y, Axis::Z, Axis::Rx, Axis::Ry];

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::Rx => "rx",
            Axis::Ry => "ry",
        }
    }
}

/// Inclusive bound interval of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Interval width.
    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Interval midpoint, used for unselected variables.
    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Window of total width `fraction * width()` centered on `center`,
    /// clipped to this interval.
    pub fn window_around(&self, center: f64, fraction: f64) -> Bounds {
        let center = self.clamp(center);
        let half = fraction * self.width() / 2.0;
        Bounds {
            lower: (center - half).max(self.lower),
            upper: (center + half).min(self.upper),
        }
    }
}

/// Bound intervals for all five axes of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisBounds {
    #[serde(default = "default_linear_bounds")]
    pub x: Bounds,
    #[serde(default = "default_linear_bounds")]
    pub y: Bounds,
    #[serde(default = "default_linear_bounds")]
    pub z: Bounds,
    #[serde(default = "default_angular_bounds")]
    pub rx: Bounds,
    #[serde(default = "default_angular_bounds")]
    pub ry: Bounds,
}

impl Default for AxisBounds {
    fn default() -> Self {
        Self {
            x: default_linear_bounds(),
            y: default_linear_bounds(),
            z: default_linear_bounds(),
            rx: default_angular_bounds(),
            ry: default_angular_bounds(),
        }
    }
}

impl AxisBounds {
    pub fn get(&self, axis: Axis) -> Bounds {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::Rx => self.rx,
            Axis::Ry => self.ry,
        }
    }
}

fn default_linear_bounds() -> Bounds {
    Bounds::new(0.0, 30.0)
}
fn default_angular_bounds() -> Bounds {
    Bounds::new(0.0, 0.03)
}
fn default_variables() -> Vec<Axis> {
    Axis::ALL.to_vec()
}

/// Selected variables and bounds of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpace {
    /// Variables the optimizer moves, in individual order.
    #[serde(default = "default_variables")]
    pub variables: Vec<Axis>,
    /// Bounds for every axis, selected or not.
    #[serde(default)]
    pub bounds: AxisBounds,
}

impl Default for EndpointSpace {
    fn default() -> Self {
        Self {
            variables: default_variables(),
            bounds: AxisBounds::default(),
        }
    }
}

impl EndpointSpace {
    /// Number of selected variables (individual length).
    #[inline]
    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    /// Bounds of the `index`-th selected variable.
    #[inline]
    pub fn bounds(&self, index: usize) -> Bounds {
        self.bounds.get(self.variables[index])
    }

    /// Bounds of every selected variable, in individual order.
    pub fn selected_bounds(&self) -> impl Iterator<Item = Bounds> + '_ {
        self.variables.iter().map(|&axis| self.bounds.get(axis))
    }

    /// Whether every component of `individual` is inside its interval.
    pub fn contains(&self, individual: &[f64]) -> bool {
        individual.len() == self.dimension()
            && individual
                .iter()
                .zip(self.selected_bounds())
                .all(|(&v, b)| b.contains(v))
    }

    /// Full five-axis values for an individual; unselected axes sit at their midpoint.
    pub fn axis_values(&self, individual: &[f64]) -> AxisValues {
        let mut values = AxisValues {
            x: self.bounds.x.midpoint(),
            y: self.bounds.y.midpoint(),
            z: self.bounds.z.midpoint(),
            rx: self.bounds.rx.midpoint(),
            ry: self.bounds.ry.midpoint(),
        };
        for (&axis, &value) in self.variables.iter().zip(individual) {
            values.set(axis, value);
        }
        values
    }

    /// Project five-axis values back onto the selected variables, clipped to bounds.
    pub fn individual_from(&self, values: &AxisValues) -> Individual {
        self.variables
            .iter()
            .map(|&axis| self.bounds.get(axis).clamp(values.get(axis)))
            .collect()
    }

    fn validate(&self, endpoint: Endpoint) -> Result<(), ConfigError> {
        for (i, axis) in self.variables.iter().enumerate() {
            if self.variables[..i].contains(axis) {
                return Err(ConfigError::DuplicateVariable {
                    endpoint,
                    axis: axis.name(),
                });
            }
        }
        for axis in Axis::ALL {
            let b = self.bounds.get(axis);
            if !b.lower.is_finite() || !b.upper.is_finite() || b.lower > b.upper {
                return Err(ConfigError::InvalidBounds(format!(
                    "{}_{} min ({}) > max ({}) or not finite",
                    endpoint.prefix(),
                    axis.name(),
                    b.lower,
                    b.upper
                )));
            }
        }
        Ok(())
    }
}

/// Search space of both endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    #[serde(default)]
    pub a: EndpointSpace,
    #[serde(default)]
    pub b: EndpointSpace,
}

impl SearchSpace {
    pub fn endpoint(&self, endpoint: Endpoint) -> &EndpointSpace {
        match endpoint {
            Endpoint::A => &self.a,
            Endpoint::B => &self.b,
        }
    }

    /// Build the full pose from an (A, B) individual pair.
    pub fn pose(&self, a: &[f64], b: &[f64]) -> Pose {
        Pose {
            a: self.a.axis_values(a),
            b: self.b.axis_values(b),
        }
    }

    /// Extract the individual of one endpoint from a pose.
    pub fn individual_from_pose(&self, endpoint: Endpoint, pose: &Pose) -> Individual {
        self.endpoint(endpoint)
            .individual_from(pose.endpoint(endpoint))
    }

    /// Validate variable selection and bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.a.validate(Endpoint::A)?;
        self.b.validate(Endpoint::B)?;
        if self.a.dimension() + self.b.dimension() == 0 {
            return Err(ConfigError::NoVariables);
        }
        Ok(())
    }
}

/// Values of all five axes of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisValues {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
}

impl AxisValues {
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::Rx => self.rx,
            Axis::Ry => self.ry,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::Rx => self.rx = value,
            Axis::Ry => self.ry = value,
        }
    }
}

/// Full position of both endpoints, as sent to the fitness evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub a: AxisValues,
    pub b: AxisValues,
}

impl Pose {
    pub fn endpoint(&self, endpoint: Endpoint) -> &AxisValues {
        match endpoint {
            Endpoint::A => &self.a,
            Endpoint::B => &self.b,
        }
    }

    pub fn get(&self, endpoint: Endpoint, axis: Axis) -> f64 {
        self.endpoint(endpoint).get(axis)
    }

    /// Named entries (`A_x` .. `B_ry`) in canonical order.
    pub fn named(&self) -> Vec<(String, f64)> {
        [Endpoint::A, Endpoint::B]
            .into_iter()
            .flat_map(|e| {
                Axis::ALL
                    .into_iter()
                    .map(move |axis| (format!("{}_{}", e.prefix(), axis.name()), self.get(e, axis)))
            })
            .collect()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.named().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{name}={value:.5}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Tunable parameters
// ============================================================================

/// Parameters that may be changed between generations.
///
/// Validation rules for each field live in [`super::update::FIELDS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_elite_size")]
    pub elite_size: usize,
    #[serde(default = "default_tournament_size")]
    pub tournament_size: usize,
    #[serde(default = "default_gene_mutation_rate")]
    pub gene_mutation_rate: f64,
    #[serde(default = "default_gene_crossover_rate")]
    pub gene_crossover_rate: f64,
    #[serde(default = "default_chromosome_crossover_rate")]
    pub chromosome_crossover_rate: f64,
    /// Relative spread of the last three bests below which a generation
    /// counts as locally converged.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    /// Enhanced-exploration rounds allowed before global convergence.
    #[serde(default = "default_enhanced_exploration_max")]
    pub enhanced_exploration_max: usize,
    #[serde(default = "default_enhanced_mutation_rate")]
    pub enhanced_mutation_rate: f64,
    /// Reading at which light is considered detected.
    #[serde(default = "default_light_threshold")]
    pub light_threshold: f64,
    /// Relative deviation from the remembered best that locks the position.
    #[serde(default = "default_lock_mode_threshold")]
    pub lock_mode_threshold: f64,
    #[serde(default)]
    pub high_power: HighPowerSettings,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            elite_size: default_elite_size(),
            tournament_size: default_tournament_size(),
            gene_mutation_rate: default_gene_mutation_rate(),
            gene_crossover_rate: default_gene_crossover_rate(),
            chromosome_crossover_rate: default_chromosome_crossover_rate(),
            convergence_threshold: default_convergence_threshold(),
            enhanced_exploration_max: default_enhanced_exploration_max(),
            enhanced_mutation_rate: default_enhanced_mutation_rate(),
            light_threshold: default_light_threshold(),
            lock_mode_threshold: default_lock_mode_threshold(),
            high_power: HighPowerSettings::default(),
        }
    }
}

fn default_population_size() -> usize {
    30
}
fn default_elite_size() -> usize {
    4
}
fn default_tournament_size() -> usize {
    3
}
fn default_gene_mutation_rate() -> f64 {
    0.15
}
fn default_gene_crossover_rate() -> f64 {
    0.8
}
fn default_chromosome_crossover_rate() -> f64 {
    0.2
}
fn default_convergence_threshold() -> f64 {
    0.05
}
fn default_enhanced_exploration_max() -> usize {
    3
}
fn default_enhanced_mutation_rate() -> f64 {
    0.7
}
fn default_light_threshold() -> f64 {
    0.0002
}
fn default_lock_mode_threshold() -> f64 {
    0.001
}

/// High-power-keep mode parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighPowerSettings {
    #[serde(default = "default_hp_population_size")]
    pub population_size: usize,
    #[serde(default = "default_hp_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_hp_crossover_rate")]
    pub crossover_rate: f64,
    /// Chromosome crossover rate in effect while the mode is active.
    #[serde(default = "default_hp_chromosome_crossover_rate")]
    pub chromosome_crossover_rate: f64,
    /// Local window width as a fraction of each variable's range.
    #[serde(default = "default_hp_search_range_percent")]
    pub search_range_percent: f64,
    /// Clone perturbation standard deviation as a fraction of each variable's range.
    #[serde(default = "default_hp_perturbation_strength")]
    pub perturbation_strength: f64,
    /// Relative reading change below which a generation counts as stable.
    #[serde(default = "default_hp_convergence_threshold")]
    pub convergence_threshold: f64,
    /// Consecutive stable generations before rates shrink.
    #[serde(default = "default_hp_stable_generations")]
    pub stable_generations: usize,
    #[serde(default = "default_param_adjustment_rate")]
    pub adjustment_rate: f64,
    #[serde(default = "default_min_mutation_rate")]
    pub min_mutation_rate: f64,
    #[serde(default = "default_max_mutation_rate")]
    pub max_mutation_rate: f64,
    #[serde(default = "default_min_crossover_rate")]
    pub min_crossover_rate: f64,
    #[serde(default = "default_max_crossover_rate")]
    pub max_crossover_rate: f64,
}

impl Default for HighPowerSettings {
    fn default() -> Self {
        Self {
            population_size: default_hp_population_size(),
            mutation_rate: default_hp_mutation_rate(),
            crossover_rate: default_hp_crossover_rate(),
            chromosome_crossover_rate: default_hp_chromosome_crossover_rate(),
            search_range_percent: default_hp_search_range_percent(),
            perturbation_strength: default_hp_perturbation_strength(),
            convergence_threshold: default_hp_convergence_threshold(),
            stable_generations: default_hp_stable_generations(),
            adjustment_rate: default_param_adjustment_rate(),
            min_mutation_rate: default_min_mutation_rate(),
            max_mutation_rate: default_max_mutation_rate(),
            min_crossover_rate: default_min_crossover_rate(),
            max_crossover_rate: default_max_crossover_rate(),
        }
    }
}

fn default_hp_population_size() -> usize {
    20
}
fn default_hp_mutation_rate() -> f64 {
    0.05
}
fn default_hp_crossover_rate() -> f64 {
    0.3
}
fn default_hp_chromosome_crossover_rate() -> f64 {
    0.1
}
fn default_hp_search_range_percent() -> f64 {
    0.05
}
fn default_hp_perturbation_strength() -> f64 {
    0.01
}
fn default_hp_convergence_threshold() -> f64 {
    0.01
}
fn default_hp_stable_generations() -> usize {
    3
}
fn default_param_adjustment_rate() -> f64 {
    0.5
}
fn default_min_mutation_rate() -> f64 {
    0.01
}
fn default_max_mutation_rate() -> f64 {
    0.2
}
fn default_min_crossover_rate() -> f64 {
    0.1
}
fn default_max_crossover_rate() -> f64 {
    0.8
}

/// What happens once the position lock fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// End the run with the locked position.
    #[default]
    Stop,
    /// Keep running in high-power-keep mode centered on the locked position.
    HoldHighPower,
}

/// Top-level optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub search_space: SearchSpace,
    /// Maximum number of generations per run.
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default)]
    pub tunables: Tunables,
    #[serde(default)]
    pub lock_policy: LockPolicy,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            search_space: SearchSpace::default(),
            generations: default_generations(),
            tunables: Tunables::default(),
            lock_policy: LockPolicy::default(),
            random_seed: None,
        }
    }
}

fn default_generations() -> usize {
    200
}

impl OptimizerConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search_space.validate()?;
        if self.generations == 0 {
            return Err(ConfigError::NoGenerations);
        }
        self.tunables.validate()?;
        if self.tunables.tournament_size > self.tunables.population_size {
            return Err(ConfigError::TournamentTooLarge {
                tournament: self.tunables.tournament_size,
                population: self.tunables.population_size,
            });
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Generation count must be positive")]
    NoGenerations,
    #[error("At least one variable must be selected across both endpoints")]
    NoVariables,
    #[error("Variable {axis} selected twice on endpoint {endpoint:?}")]
    DuplicateVariable { endpoint: Endpoint, axis: &'static str },
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Tournament size {tournament} exceeds population size {population}")]
    TournamentTooLarge { tournament: usize, population: usize },
    #[error("Invalid tunable: {0}")]
    InvalidTunable(#[from] super::FieldError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search_space.a.dimension(), 5);
    }

    #[test]
    fn test_pose_fills_unselected_with_midpoint() {
        let space = SearchSpace {
            a: EndpointSpace {
                variables: vec![Axis::X, Axis::Rx],
                ..Default::default()
            },
            b: EndpointSpace {
                variables: vec![Axis::Z],
                ..Default::default()
            },
        };

        let pose = space.pose(&[3.0, 0.01], &[7.0]);
        assert_eq!(pose.a.x, 3.0);
        assert_eq!(pose.a.rx, 0.01);
        assert_eq!(pose.a.y, 15.0);
        assert_eq!(pose.a.ry, 0.015);
        assert_eq!(pose.b.z, 7.0);
        assert_eq!(pose.b.x, 15.0);

        assert_eq!(space.individual_from_pose(Endpoint::A, &pose), vec![3.0, 0.01]);
        assert_eq!(space.individual_from_pose(Endpoint::B, &pose), vec![7.0]);
    }

    #[test]
    fn test_pose_names() {
        let pose = SearchSpace::default().pose(&[1.0; 5], &[2.0; 5]);
        let named = pose.named();
        assert_eq!(named.len(), 10);
        assert_eq!(named[0].0, "A_x");
        assert_eq!(named[9], ("B_ry".to_string(), 2.0));
    }

    #[test]
    fn test_window_around_is_clipped() {
        let b = Bounds::new(0.0, 30.0);
        let w = b.window_around(0.5, 0.1);
        assert_eq!(w.lower, 0.0);
        assert!((w.upper - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = OptimizerConfig::default();
        config.search_space.a.variables = vec![Axis::X, Axis::X];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateVariable { .. })
        ));

        let mut config = OptimizerConfig::default();
        config.search_space.b.bounds.z = Bounds::new(5.0, 1.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBounds(_))));

        let mut config = OptimizerConfig::default();
        config.tunables.population_size = 2;
        assert!(config.validate().is_err());

        let mut config = OptimizerConfig::default();
        config.search_space.a.variables.clear();
        config.search_space.b.variables.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoVariables)));
    }

    #[test]
    fn test_serialization() {
        let config = OptimizerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tunables.population_size, config.tunables.population_size);

        let sparse: OptimizerConfig =
            serde_json::from_str(r#"{"search_space": {"a": {"variables": ["x", "ry"]}}}"#)
                .unwrap();
        assert_eq!(sparse.search_space.a.variables, vec![Axis::X, Axis::Ry]);
        assert_eq!(sparse.search_space.b.dimension(), 5);
        assert_eq!(sparse.generations, 200);
    }
}
