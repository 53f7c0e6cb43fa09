//! Synthetic coupling model standing in for the power meter.
//!
//! Each endpoint couples with a Gaussian overlap: lateral offsets against the
//! mode field radius, axial offsets against a wider depth of focus and tilts
//! against the angular acceptance. The optimum can drift slowly and readings
//! can carry seeded multiplicative noise.

use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::compute::optimizer::{EvalError, FitnessEvaluator};
use crate::schema::{Axis, AxisValues, Endpoint, Pose, SearchSpace};

/// Axial tolerance relative to the lateral mode field radius.
const AXIAL_FACTOR: f64 = 4.0;

/// Simulated coupling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingModel {
    /// Power at perfect alignment (mW).
    #[serde(default = "default_peak_power")]
    pub peak_power: f64,
    /// Lateral 1/e offset.
    #[serde(default = "default_mode_field_radius")]
    pub mode_field_radius: f64,
    /// Tilt 1/e offset.
    #[serde(default = "default_angular_acceptance")]
    pub angular_acceptance: f64,
    /// Optimal pose. Defaults to 60% (A) and 40% (B) of each axis range.
    #[serde(default)]
    pub optimum: Option<Pose>,
    /// Shift of the optimal x of both endpoints per evaluation.
    #[serde(default)]
    pub drift_per_evaluation: f64,
    /// Relative standard deviation of reading noise.
    #[serde(default)]
    pub noise: f64,
    /// Fail every n-th evaluation with a hardware fault.
    #[serde(default)]
    pub fault_every: Option<u64>,
    /// Noise seed.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for CouplingModel {
    fn default() -> Self {
        Self {
            peak_power: default_peak_power(),
            mode_field_radius: default_mode_field_radius(),
            angular_acceptance: default_angular_acceptance(),
            optimum: None,
            drift_per_evaluation: 0.0,
            noise: 0.0,
            fault_every: None,
            seed: None,
        }
    }
}

fn default_peak_power() -> f64 {
    1.0
}
fn default_mode_field_radius() -> f64 {
    3.0
}
fn default_angular_acceptance() -> f64 {
    0.005
}

fn placed_optimum(space: &SearchSpace) -> Pose {
    let place = |endpoint: Endpoint, fraction: f64| {
        let bounds = &space.endpoint(endpoint).bounds;
        let mut values = AxisValues::default();
        for axis in Axis::ALL {
            let b = bounds.get(axis);
            values.set(axis, b.lower + fraction * b.width());
        }
        values
    };
    Pose {
        a: place(Endpoint::A, 0.6),
        b: place(Endpoint::B, 0.4),
    }
}

/// Evaluator backed by [`CouplingModel`].
#[derive(Debug)]
pub struct SimulatedCoupling {
    model: CouplingModel,
    optimum: Pose,
    rng: StdRng,
    evaluations: u64,
}

impl SimulatedCoupling {
    pub fn new(model: CouplingModel, space: &SearchSpace) -> Self {
        let optimum = model.optimum.unwrap_or_else(|| placed_optimum(space));
        let rng = match model.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model,
            optimum,
            rng,
            evaluations: 0,
        }
    }

    /// Optimum after drift so far.
    pub fn optimum(&self) -> Pose {
        let shift = self.model.drift_per_evaluation * self.evaluations as f64;
        let mut optimum = self.optimum;
        optimum.a.x += shift;
        optimum.b.x += shift;
        optimum
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn overlap(&self, values: &AxisValues, optimum: &AxisValues) -> f64 {
        let w = self.model.mode_field_radius;
        let theta = self.model.angular_acceptance;
        let lateral = ((values.x - optimum.x) / w).powi(2) + ((values.y - optimum.y) / w).powi(2);
        let axial = ((values.z - optimum.z) / (w * AXIAL_FACTOR)).powi(2);
        let tilt = ((values.rx - optimum.rx) / theta).powi(2) + ((values.ry - optimum.ry) / theta).powi(2);
        (-(lateral + axial + tilt)).exp()
    }

    /// Noise-free power at `pose` for the current optimum.
    pub fn ideal_power(&self, pose: &Pose) -> f64 {
        let optimum = self.optimum();
        self.model.peak_power * self.overlap(&pose.a, &optimum.a) * self.overlap(&pose.b, &optimum.b)
    }
}

impl FitnessEvaluator for SimulatedCoupling {
    fn measure(&mut self, pose: &Pose) -> Result<f64, EvalError> {
        let power = self.ideal_power(pose);
        self.evaluations += 1;

        if let Some(n) = self.model.fault_every
            && n > 0
            && self.evaluations % n == 0
        {
            return Err(EvalError::Hardware(format!(
                "simulated meter dropout at evaluation {}",
                self.evaluations
            )));
        }

        if self.model.noise > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            return Ok((power * (1.0 + self.model.noise * z)).max(0.0));
        }
        Ok(power)
    }
}
