//! Rig configuration and serialization.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calibration::MarkerConfig;
use crate::error::{Error, Result};
use crate::reconstruction::VolumeParams;

/// Configuration for the capture rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Number of synthetic sensors when running in simulation.
    pub sensor_count: usize,
    /// Dispatch tick period in milliseconds.
    pub tick_period_ms: u64,
    /// Per-sensor frame read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Calibration attempts per sensor pair before the run aborts.
    pub max_attempts: u32,
    /// Calibration marker the external routine looks for.
    pub marker: MarkerConfig,
    /// Reconstruction working volume.
    pub volume: VolumeParams,
    /// Output path for the exported mesh.
    pub mesh_path: PathBuf,
    /// Default path for saving/loading the calibration chain.
    pub calibration_path: PathBuf,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            sensor_count: 2,
            tick_period_ms: 50,
            read_timeout_ms: 40,
            max_attempts: 10,
            marker: MarkerConfig::default(),
            volume: VolumeParams::default(),
            mesh_path: PathBuf::from("mesh.ply"),
            calibration_path: PathBuf::from("calibration.txt"),
        }
    }
}

impl RigConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Write configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Parse(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
