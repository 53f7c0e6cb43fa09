//! Position lock: freeze the run once a reading returns close to a remembered best.

/// Armed lock comparing live readings against a fixed reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionLock {
    reference: f64,
}

impl PositionLock {
    /// Arm against `reference`. The reference never changes afterwards.
    pub fn arm(reference: f64) -> Self {
        Self { reference }
    }

    pub fn reference(&self) -> f64 {
        self.reference
    }

    /// `|fitness − reference| / reference`, `None` when the reference is not positive.
    pub fn deviation(&self, fitness: f64) -> Option<f64> {
        (self.reference > 0.0).then(|| (fitness - self.reference).abs() / self.reference)
    }

    /// Deviation of `fitness` if it is within `threshold`.
    pub fn check(&self, fitness: f64, threshold: f64) -> Option<f64> {
        self.deviation(fitness).filter(|&deviation| deviation <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_threshold() {
        let lock = PositionLock::arm(10.0);
        let deviation = lock.check(10.005, 0.001).unwrap();
        assert!((deviation - 0.0005).abs() < 1e-9);
        assert!(lock.check(10.02, 0.001).is_none());
        assert!(lock.check(9.995, 0.001).is_some());
    }

    #[test]
    fn test_non_positive_reference_never_locks() {
        assert!(PositionLock::arm(0.0).check(0.0, 0.1).is_none());
        assert!(PositionLock::arm(-1.0).check(-1.0, 0.1).is_none());
    }
}
