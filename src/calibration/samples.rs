//! Per-sensor calibration frame storage.

use crate::sensor::{ColorImage, DepthImage, SensorDescriptor};

/// Most recent calibration frame pair for one sensor.
///
/// Buffers are allocated once at startup and reused across capture attempts;
/// the validity flag is cleared before each attempt and set when the dispatch
/// loop copies a fresh frame in.
pub struct CalibrationSample {
    pub depth: DepthImage,
    pub color: ColorImage,
    valid: bool,
}

/// One [`CalibrationSample`] slot per sensor.
///
/// Written by the dispatch loop while calibration capture is active, read by
/// the chain calibrator once both sensors of the current pair are valid.
pub struct CalibrationSampleBuffer {
    slots: Vec<CalibrationSample>,
}

impl CalibrationSampleBuffer {
    pub fn new(descriptors: &[SensorDescriptor]) -> Self {
        let slots = descriptors
            .iter()
            .map(|d| CalibrationSample {
                depth: DepthImage::new(d.depth_width, d.depth_height),
                color: ColorImage::new(d.color_width, d.color_height),
                valid: false,
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Clear the validity flags for both sensors of a pair before a capture
    /// attempt.
    pub fn invalidate_pair(&mut self, pair: usize) {
        self.slots[pair].valid = false;
        self.slots[pair + 1].valid = false;
    }

    /// Copy a freshly read frame into the sensor's slot and mark it valid.
    /// Repeated ticks overwrite until the calibrator consumes the pair.
    pub fn store(&mut self, sensor: usize, depth: &DepthImage, color: &ColorImage) {
        let slot = &mut self.slots[sensor];
        slot.depth.clone_from(depth);
        slot.color.clone_from(color);
        slot.valid = true;
    }

    pub fn is_valid(&self, sensor: usize) -> bool {
        self.slots[sensor].valid
    }

    /// True once both sensors of the pair hold a fresh frame.
    pub fn pair_valid(&self, pair: usize) -> bool {
        self.slots[pair].valid && self.slots[pair + 1].valid
    }

    pub fn sample(&self, sensor: usize) -> &CalibrationSample {
        &self.slots[sensor]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DMat3, DMat4};

    fn descriptors(n: usize) -> Vec<SensorDescriptor> {
        (0..n)
            .map(|index| SensorDescriptor {
                index,
                color_width: 8,
                color_height: 6,
                depth_width: 4,
                depth_height: 3,
                depth_intrinsics: DMat3::IDENTITY,
                color_intrinsics: DMat3::IDENTITY,
                depth_to_color: DMat4::IDENTITY,
            })
            .collect()
    }

    #[test]
    fn test_pair_valid_requires_both() {
        let descs = descriptors(3);
        let mut samples = CalibrationSampleBuffer::new(&descs);
        let depth = DepthImage::new(4, 3);
        let color = ColorImage::new(8, 6);

        assert!(!samples.pair_valid(0));
        samples.store(0, &depth, &color);
        assert!(!samples.pair_valid(0));
        samples.store(1, &depth, &color);
        assert!(samples.pair_valid(0));

        samples.invalidate_pair(0);
        assert!(!samples.is_valid(0));
        assert!(!samples.is_valid(1));
    }

    #[test]
    fn test_store_copies_frame_contents() {
        let descs = descriptors(2);
        let mut samples = CalibrationSampleBuffer::new(&descs);
        let mut depth = DepthImage::new(4, 3);
        depth.put_pixel(2, 1, image::Luma([1234.5f32]));
        let color = ColorImage::new(8, 6);

        samples.store(1, &depth, &color);
        assert_eq!(samples.sample(1).depth.get_pixel(2, 1).0[0], 1234.5);
    }
}
