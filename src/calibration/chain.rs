//! Per-sensor global transforms composed from pairwise calibrations.

use glam::DMat4;

/// Ordered collection of per-sensor rigid transforms.
///
/// Entry `i` is the pose of sensor `i` relative to sensor 0's coordinate
/// frame, so entry 0 is always identity. The chain is mutated only by the
/// calibration controller; the dispatch loop and persistence read it whole.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationChain {
    poses: Vec<DMat4>,
}

impl TransformationChain {
    /// A fresh all-identity chain for `sensor_count` sensors.
    pub fn identity(sensor_count: usize) -> Self {
        Self {
            poses: vec![DMat4::IDENTITY; sensor_count],
        }
    }

    /// Build a chain from already-composed poses (used by persistence).
    pub fn from_poses(poses: Vec<DMat4>) -> Self {
        Self { poses }
    }

    /// Reset every entry to identity.
    pub fn reset(&mut self) {
        for pose in &mut self.poses {
            *pose = DMat4::IDENTITY;
        }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Pose of sensor `index` relative to sensor 0.
    pub fn pose(&self, index: usize) -> DMat4 {
        self.poses[index]
    }

    pub fn poses(&self) -> &[DMat4] {
        &self.poses
    }

    /// Commit a successful pairwise calibration between sensors `pair` and
    /// `pair + 1`: `chain[pair + 1] = chain[pair] * pairwise`.
    pub fn compose(&mut self, pair: usize, pairwise: DMat4) {
        self.poses[pair + 1] = self.poses[pair] * pairwise;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_fresh_chain_is_identity() {
        let chain = TransformationChain::identity(4);
        assert_eq!(chain.len(), 4);
        for i in 0..4 {
            assert_eq!(chain.pose(i), DMat4::IDENTITY);
        }
    }

    #[test]
    fn test_composition_law() {
        let mut chain = TransformationChain::identity(3);
        let t0 = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0));
        let t1 = DMat4::from_translation(DVec3::new(0.0, 5.0, 0.0));

        chain.compose(0, t0);
        chain.compose(1, t1);

        assert_eq!(chain.pose(0), DMat4::IDENTITY);
        assert_eq!(chain.pose(1), chain.pose(0) * t0);
        assert_eq!(chain.pose(2), chain.pose(1) * t1);
    }

    #[test]
    fn test_reset_restores_identity() {
        let mut chain = TransformationChain::identity(2);
        chain.compose(0, DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0)));
        chain.reset();
        assert_eq!(chain, TransformationChain::identity(2));
    }
}
