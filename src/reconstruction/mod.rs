//! Volumetric reconstruction seam.
//!
//! The fusion engine itself is an external collaborator; this module defines
//! the contracts the dispatch loop drives it through, plus the fixed mesh
//! export step that runs when a session is stopped.

use std::path::Path;

use glam::{DMat3, DMat4, DVec3, IVec3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sensor::{ColorImage, DepthImage, PreviewImage, SensorDescriptor};

/// Physical position, voxel resolution and extent of the working volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeParams {
    /// Volume center position in millimeters.
    pub position: DVec3,
    /// Voxel grid resolution per axis.
    pub resolution: IVec3,
    /// Physical size per axis in millimeters.
    pub size: DVec3,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            position: DVec3::new(230.0, 0.0, 1000.0),
            resolution: IVec3::new(360, 512, 360),
            size: DVec3::new(700.0, 1000.0, 700.0),
        }
    }
}

/// Per-frame alignment signal from the fusion engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Frame was aligned against the accumulated model; the preview buffer
    /// holds a fresh rendering.
    Tracking,
    /// Frame could not be aligned. Non-fatal, per-sensor.
    Lost,
}

/// Opaque mesh handle returned when a session ends.
pub trait Mesh {
    fn vertex_count(&self) -> usize;
    fn triangle_count(&self) -> usize;

    /// Apply a rigid transform to every vertex.
    fn apply_transform(&mut self, rotation: DMat3, translation: DVec3);

    /// Write the mesh to disk in a standard format (chosen by extension).
    fn save(&self, path: &Path) -> Result<()>;
}

/// An open reconstruction session owning the volumetric model.
pub trait ReconstructionService {
    /// Fuse one sensor frame. On `Tracking` the engine has rendered a
    /// preview of the current model into `preview`.
    fn add_frame(
        &mut self,
        sensor: usize,
        depth: &DepthImage,
        color: &ColorImage,
        pose: &DMat4,
        preview: &mut PreviewImage,
    ) -> Result<TrackingStatus>;

    /// Extract the mesh and end the session.
    fn get_mesh(self: Box<Self>) -> Result<Box<dyn Mesh>>;
}

/// Creates reconstruction sessions from sensor parameters and volume bounds.
pub trait ReconstructionBackend {
    fn start_session(
        &mut self,
        descriptors: &[SensorDescriptor],
        volume: &VolumeParams,
    ) -> Result<Box<dyn ReconstructionService>>;
}

/// The fixed axis flip applied to the output mesh before export:
/// a 180 degree rotation about the x axis.
pub fn export_flip() -> DMat3 {
    DMat3::from_diagonal(DVec3::new(1.0, -1.0, -1.0))
}
