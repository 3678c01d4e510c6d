//! Extrinsic calibration: chain state, sample capture, controller, persistence.

mod chain;
mod controller;
mod persistence;
mod samples;

pub use chain::TransformationChain;
pub use controller::{
    CalibrationEvent, CalibrationPhase, ChainCalibrator, MarkerConfig, PairCalibrator,
    PairObservation,
};
pub use persistence::{load_chain, save_chain};
pub use samples::{CalibrationSample, CalibrationSampleBuffer};
