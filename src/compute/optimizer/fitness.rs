//! Fitness evaluation boundary.
//!
//! The optimizer never talks to hardware. It hands a full [`Pose`] to an
//! injected evaluator and gets back a power reading.

use std::time::Duration;

use log::warn;

use crate::schema::Pose;

/// Evaluator faults. They never abort a run; the reading becomes zero.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Hardware fault: {0}")]
    Hardware(String),
    #[error("Measurement timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid reading: {0}")]
    InvalidReading(String),
}

/// Source of power readings for candidate poses.
///
/// Calls are blocking and strictly sequential.
pub trait FitnessEvaluator {
    fn measure(&mut self, pose: &Pose) -> Result<f64, EvalError>;
}

impl<F> FitnessEvaluator for F
where
    F: FnMut(&Pose) -> Result<f64, EvalError>,
{
    fn measure(&mut self, pose: &Pose) -> Result<f64, EvalError> {
        self(pose)
    }
}

/// Measure `pose`, mapping faults and non-finite readings to `0.0`.
pub fn read_power<E: FitnessEvaluator + ?Sized>(evaluator: &mut E, pose: &Pose) -> f64 {
    match evaluator.measure(pose) {
        Ok(power) if power.is_finite() => power,
        Ok(power) => {
            warn!("Discarding non-finite reading {power} at {pose}");
            0.0
        }
        Err(err) => {
            warn!("Evaluation failed at {pose}: {err}");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_read_as_zero() {
        let pose = Pose::default();

        let mut failing = |_: &Pose| -> Result<f64, EvalError> { Err(EvalError::Hardware("meter offline".into())) };
        assert_eq!(read_power(&mut failing, &pose), 0.0);

        let mut nan = |_: &Pose| -> Result<f64, EvalError> { Ok(f64::NAN) };
        assert_eq!(read_power(&mut nan, &pose), 0.0);

        let mut ok = |p: &Pose| -> Result<f64, EvalError> { Ok(p.a.x + 1.5) };
        assert_eq!(read_power(&mut ok, &pose), 1.5);
    }
}
