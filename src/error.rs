//! Error types for the reconstruction rig.

use thiserror::Error;

use crate::dispatch::Mode;

/// Errors that can occur while coordinating sensors, calibration and fusion.
#[derive(Error, Debug)]
pub enum Error {
    /// A sensor could not be opened at startup. Fatal: the session cannot proceed.
    #[error("couldn't open sensor #{index}")]
    SensorOpenFailed { index: usize },

    /// A per-tick frame read failed. Absorbed by the dispatch loop, never
    /// propagated past it.
    #[error("sensor #{index} frame read failed")]
    SensorReadFailed { index: usize },

    /// Pairwise calibration exhausted its retry budget.
    #[error("calibration between sensors {} and {} failed after {attempts} attempts", .pair + 1, .pair + 2)]
    CalibrationPairFailed { pair: usize, attempts: u32 },

    /// A mode transition was rejected. No state change took place.
    #[error("cannot enter {requested} while {active} is active")]
    ModeConflict { requested: Mode, active: Mode },

    /// The calibration file could not be parsed. The in-memory chain is
    /// left untouched.
    #[error("calibration file: {0}")]
    Parse(String),

    /// The reconstruction session ended without producing a mesh. The
    /// session is torn down regardless; no file is written.
    #[error("couldn't retrieve mesh from reconstruction")]
    MeshRetrievalFailed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
