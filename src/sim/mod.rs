//! Simulated collaborators: synthetic sensors, a marker routine and a
//! reconstruction backend that run without any hardware or vendor SDK.
//!
//! Used by the binary's simulation mode and by the test suite.

use std::path::Path;
use std::time::Duration;

use glam::{DMat3, DMat4, DVec3};
use image::{Luma, Rgb, Rgba};

use crate::calibration::{MarkerConfig, PairCalibrator, PairObservation};
use crate::error::Result;
use crate::reconstruction::{
    Mesh, ReconstructionBackend, ReconstructionService, TrackingStatus, VolumeParams,
};
use crate::sensor::{ColorImage, DepthImage, PreviewImage, SensorDescriptor, SensorHandle};

/// Deterministic in-process depth/color sensor.
pub struct SyntheticSensor {
    index: usize,
    color_width: u32,
    color_height: u32,
    depth_width: u32,
    depth_height: u32,
    open: bool,
    fail_reads: bool,
    frame_counter: u64,
}

impl SyntheticSensor {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            color_width: 64,
            color_height: 48,
            depth_width: 32,
            depth_height: 24,
            open: false,
            fail_reads: false,
            frame_counter: 0,
        }
    }

    /// A sensor whose every frame read times out.
    pub fn failing(index: usize) -> Self {
        Self {
            fail_reads: true,
            ..Self::new(index)
        }
    }
}

impl SensorHandle for SyntheticSensor {
    fn open(&mut self) -> bool {
        self.open = true;
        true
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn color_width(&self) -> u32 {
        self.color_width
    }

    fn color_height(&self) -> u32 {
        self.color_height
    }

    fn depth_width(&self) -> u32 {
        self.depth_width
    }

    fn depth_height(&self) -> u32 {
        self.depth_height
    }

    fn depth_intrinsics(&self) -> DMat3 {
        pinhole(self.depth_width, self.depth_height)
    }

    fn color_intrinsics(&self) -> DMat3 {
        pinhole(self.color_width, self.color_height)
    }

    fn depth_to_color(&self) -> DMat4 {
        // Small fixed baseline between the depth and color cameras.
        DMat4::from_translation(DVec3::new(25.0, 0.0, 0.0))
    }

    fn read_image(
        &mut self,
        depth: &mut DepthImage,
        color: &mut ColorImage,
        _timeout: Duration,
    ) -> bool {
        if !self.open || self.fail_reads {
            return false;
        }
        self.frame_counter += 1;

        let phase = (self.frame_counter % 255) as u8;
        for (x, y, pixel) in depth.enumerate_pixels_mut() {
            *pixel = Luma([800.0 + (x + y) as f32 + self.index as f32 * 10.0]);
        }
        for (x, _y, pixel) in color.enumerate_pixels_mut() {
            *pixel = Rgb([phase, x as u8, self.index as u8]);
        }
        true
    }
}

fn pinhole(width: u32, height: u32) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(525.0, 0.0, 0.0),
        DVec3::new(0.0, 525.0, 0.0),
        DVec3::new(width as f64 / 2.0, height as f64 / 2.0, 1.0),
    )
}

/// Marker routine that always resolves to a fixed translation between
/// adjacent sensors.
pub struct SyntheticPairCalibrator {
    baseline_mm: f64,
}

impl SyntheticPairCalibrator {
    pub fn new(baseline_mm: f64) -> Self {
        Self { baseline_mm }
    }
}

impl Default for SyntheticPairCalibrator {
    fn default() -> Self {
        Self::new(400.0)
    }
}

impl PairCalibrator for SyntheticPairCalibrator {
    fn calibrate_pair(
        &mut self,
        _reference: PairObservation<'_>,
        _target: PairObservation<'_>,
        _marker: &MarkerConfig,
    ) -> Option<DMat4> {
        Some(DMat4::from_translation(DVec3::new(self.baseline_mm, 0.0, 0.0)))
    }
}

/// Reconstruction backend that accumulates nothing but behaves like the
/// real engine at the interface: frames are accepted, tracking always
/// succeeds, the preview gets a rendering, and the mesh is the volume's
/// corner box.
pub struct SimulatedReconstruction;

impl ReconstructionBackend for SimulatedReconstruction {
    fn start_session(
        &mut self,
        descriptors: &[SensorDescriptor],
        volume: &VolumeParams,
    ) -> Result<Box<dyn ReconstructionService>> {
        log::info!(
            "simulated reconstruction session over {} sensors",
            descriptors.len()
        );
        Ok(Box::new(SimulatedSession {
            volume: volume.clone(),
            frames: 0,
        }))
    }
}

struct SimulatedSession {
    volume: VolumeParams,
    frames: u64,
}

impl ReconstructionService for SimulatedSession {
    fn add_frame(
        &mut self,
        _sensor: usize,
        _depth: &DepthImage,
        color: &ColorImage,
        _pose: &DMat4,
        preview: &mut PreviewImage,
    ) -> Result<TrackingStatus> {
        self.frames += 1;
        // Stand-in for the engine's model rendering: tint the color frame.
        for (x, y, pixel) in preview.enumerate_pixels_mut() {
            let src = color.get_pixel(
                x.min(color.width() - 1),
                y.min(color.height() - 1),
            );
            *pixel = Rgba([src.0[0], src.0[1] / 2, src.0[2], 255]);
        }
        Ok(TrackingStatus::Tracking)
    }

    fn get_mesh(self: Box<Self>) -> Result<Box<dyn Mesh>> {
        let half = self.volume.size * 0.5;
        let center = self.volume.position;
        let mut vertices = Vec::with_capacity(8);
        for &sx in &[-1.0, 1.0] {
            for &sy in &[-1.0, 1.0] {
                for &sz in &[-1.0, 1.0] {
                    vertices.push(center + DVec3::new(sx * half.x, sy * half.y, sz * half.z));
                }
            }
        }
        Ok(Box::new(SimulatedMesh { vertices }))
    }
}

struct SimulatedMesh {
    vertices: Vec<DVec3>,
}

impl Mesh for SimulatedMesh {
    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn triangle_count(&self) -> usize {
        0
    }

    fn apply_transform(&mut self, rotation: DMat3, translation: DVec3) {
        for vertex in &mut self.vertices {
            *vertex = rotation * *vertex + translation;
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("ply\nformat ascii 1.0\n");
        out.push_str(&format!("element vertex {}\n", self.vertices.len()));
        out.push_str("property double x\nproperty double y\nproperty double z\n");
        out.push_str("element face 0\nproperty list uchar int vertex_indices\nend_header\n");
        for v in &self.vertices {
            out.push_str(&format!("{} {} {}\n", v.x, v.y, v.z));
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_sensor_reads_after_open() {
        let mut sensor = SyntheticSensor::new(0);
        let mut depth = DepthImage::new(sensor.depth_width(), sensor.depth_height());
        let mut color = ColorImage::new(sensor.color_width(), sensor.color_height());

        assert!(!sensor.read_image(&mut depth, &mut color, Duration::from_millis(40)));
        assert!(sensor.open());
        assert!(sensor.read_image(&mut depth, &mut color, Duration::from_millis(40)));
        assert!(depth.get_pixel(0, 0).0[0] > 0.0);
    }

    #[test]
    fn test_mesh_flip_negates_y_and_z() {
        let mut mesh = SimulatedMesh {
            vertices: vec![DVec3::new(1.0, 2.0, 3.0)],
        };
        mesh.apply_transform(crate::reconstruction::export_flip(), DVec3::ZERO);
        assert_eq!(mesh.vertices[0], DVec3::new(1.0, -2.0, -3.0));
    }
}
