//! Sensor abstraction for depth/color cameras.
//!
//! The actual device I/O lives behind the [`SensorHandle`] trait; the rest of
//! the crate only sees frame buffers and calibration parameters.

use std::time::Duration;

use glam::{DMat3, DMat4};
use image::{ImageBuffer, Luma, RgbImage, RgbaImage};

use crate::error::{Error, Result};

/// Depth frame: one f32 depth value per pixel, in millimeters.
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Color frame: 8-bit RGB.
pub type ColorImage = RgbImage;

/// Preview scratch buffer the fusion engine renders into (RGBA).
pub type PreviewImage = RgbaImage;

/// Handle to one physical depth/color sensor.
pub trait SensorHandle: Send {
    /// Open the device. Returns false when the device is unavailable.
    fn open(&mut self) -> bool;

    /// Close the device. Idempotent.
    fn close(&mut self);

    fn color_width(&self) -> u32;
    fn color_height(&self) -> u32;
    fn depth_width(&self) -> u32;
    fn depth_height(&self) -> u32;

    /// 3x3 pinhole intrinsics of the depth camera.
    fn depth_intrinsics(&self) -> DMat3;

    /// 3x3 pinhole intrinsics of the color camera.
    fn color_intrinsics(&self) -> DMat3;

    /// Fixed rigid transform from the depth frame to the color frame.
    fn depth_to_color(&self) -> DMat4;

    /// Read one depth+color frame pair into the given buffers.
    /// Returns false when no frame arrived within `timeout`.
    fn read_image(
        &mut self,
        depth: &mut DepthImage,
        color: &mut ColorImage,
        timeout: Duration,
    ) -> bool;
}

/// Immutable per-sensor parameters, captured once after the device is opened.
#[derive(Debug, Clone)]
pub struct SensorDescriptor {
    /// Sensor index, 0..N-1.
    pub index: usize,
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub depth_intrinsics: DMat3,
    pub color_intrinsics: DMat3,
    pub depth_to_color: DMat4,
}

/// One sensor plus its reusable frame buffers, owned by the dispatch loop.
pub struct SensorContext {
    pub handle: Box<dyn SensorHandle>,
    /// Scratch buffer the last depth frame was read into.
    pub depth: DepthImage,
    /// Scratch buffer the last color frame was read into.
    pub color: ColorImage,
    /// Scratch buffer the fusion engine renders its preview into.
    pub preview: PreviewImage,
}

impl SensorContext {
    /// Open the sensor and allocate its frame buffers.
    pub fn open(mut handle: Box<dyn SensorHandle>, index: usize) -> Result<(Self, SensorDescriptor)> {
        if !handle.open() {
            return Err(Error::SensorOpenFailed { index });
        }

        let descriptor = SensorDescriptor {
            index,
            color_width: handle.color_width(),
            color_height: handle.color_height(),
            depth_width: handle.depth_width(),
            depth_height: handle.depth_height(),
            depth_intrinsics: handle.depth_intrinsics(),
            color_intrinsics: handle.color_intrinsics(),
            depth_to_color: handle.depth_to_color(),
        };

        log::info!(
            "sensor {}: color {}x{}, depth {}x{}",
            index,
            descriptor.color_width,
            descriptor.color_height,
            descriptor.depth_width,
            descriptor.depth_height
        );

        let context = Self {
            depth: DepthImage::new(descriptor.depth_width, descriptor.depth_height),
            color: ColorImage::new(descriptor.color_width, descriptor.color_height),
            preview: PreviewImage::new(descriptor.depth_width, descriptor.depth_height),
            handle,
        };

        Ok((context, descriptor))
    }

    /// True once frame buffers have been allocated for this sensor.
    pub fn has_buffers(&self) -> bool {
        self.depth.width() > 0 && self.color.width() > 0
    }
}

impl Drop for SensorContext {
    fn drop(&mut self) {
        self.handle.close();
    }
}
