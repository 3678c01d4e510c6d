//! Multi-sensor depth camera reconstruction controller.
//!
//! Coordinates N depth/color sensors into one globally-aligned 3D
//! reconstruction: calibrates the sensors pairwise in a chain, composes the
//! pairwise results into per-sensor global transforms, and routes every
//! incoming frame pair to exactly one of three activities (idle preview,
//! calibration capture, reconstruction fusion).
//!
//! Sensor I/O, marker pose estimation and volumetric fusion are external
//! collaborators behind traits; see [`sensor`], [`calibration`] and
//! [`reconstruction`].

pub mod calibration;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod reconstruction;
pub mod sensor;
pub mod sim;

pub use error::Error;
