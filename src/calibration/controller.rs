//! Pairwise calibration chain controller.
//!
//! Calibrates adjacent sensor pairs (0-1, 1-2, ...) and composes the results
//! into one global transform per sensor. Runs as a tick-stepped state machine
//! driven by the dispatch loop: while waiting for calibration frames it simply
//! stays in its capturing state, so nothing ever spins.

use glam::DMat4;
use serde::{Deserialize, Serialize};

use crate::calibration::chain::TransformationChain;
use crate::calibration::samples::CalibrationSampleBuffer;
use crate::dispatch::ModeController;
use crate::sensor::{ColorImage, DepthImage, SensorDescriptor};

/// Marker the external calibration routine looks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Marker id printed on the target.
    pub id: u32,
    /// Marker edge length in millimeters.
    pub size_mm: f64,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            id: 100,
            size_mm: 180.1,
        }
    }
}

/// One sensor's view handed to the pairwise calibration routine.
pub struct PairObservation<'a> {
    pub depth: &'a DepthImage,
    pub color: &'a ColorImage,
    pub descriptor: &'a SensorDescriptor,
}

/// External marker-based pose estimation between two sensors.
///
/// Returns the pose of the target sensor relative to the reference sensor,
/// or `None` when the marker could not be resolved in both views.
pub trait PairCalibrator {
    fn calibrate_pair(
        &mut self,
        reference: PairObservation<'_>,
        target: PairObservation<'_>,
        marker: &MarkerConfig,
    ) -> Option<DMat4>;
}

/// Where the calibration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    /// No run in progress.
    Idle,
    /// Marker prompt emitted for this pair, waiting for operator confirmation.
    AwaitingMarker { pair: usize },
    /// Capture mode active, waiting for both samples of the pair.
    Capturing { pair: usize, attempt: u32 },
    /// All pairs calibrated and composed.
    Complete,
    /// A pair exhausted its retry budget; the chain was reset to identity.
    Failed { pair: usize },
}

impl CalibrationPhase {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            CalibrationPhase::AwaitingMarker { .. } | CalibrationPhase::Capturing { .. }
        )
    }
}

impl std::fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationPhase::Idle => write!(f, "idle"),
            CalibrationPhase::AwaitingMarker { pair } => write!(f, "awaiting marker for pair {}", pair),
            CalibrationPhase::Capturing { pair, attempt } => {
                write!(f, "capturing pair {} (attempt {})", pair, attempt)
            }
            CalibrationPhase::Complete => write!(f, "complete"),
            CalibrationPhase::Failed { pair } => write!(f, "failed at pair {}", pair),
        }
    }
}

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationEvent {
    /// Ask the operator to show the marker to sensors `pair` and `pair + 1`.
    ShowMarker { pair: usize },
    PairCalibrated { pair: usize, attempts: u32 },
    PairFailed { pair: usize, attempts: u32 },
    RunComplete,
    RunAborted { pair: usize },
}

/// Drives the pairwise calibration sequence, retry policy and composition.
///
/// Commit policy: on retry exhaustion or cancellation the chain is reset to
/// identity immediately. A partially composed chain is never observable.
pub struct ChainCalibrator {
    phase: CalibrationPhase,
    marker: MarkerConfig,
    max_attempts: u32,
    marker_confirmed: bool,
    pending: Vec<CalibrationEvent>,
}

impl ChainCalibrator {
    pub fn new(marker: MarkerConfig, max_attempts: u32) -> Self {
        Self {
            phase: CalibrationPhase::Idle,
            marker,
            max_attempts,
            marker_confirmed: false,
            pending: Vec::new(),
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Begin a fresh calibration run. Resets the chain to identity and emits
    /// the marker prompt for the first pair.
    pub fn start(&mut self, chain: &mut TransformationChain) {
        chain.reset();
        self.marker_confirmed = false;
        self.pending.clear();

        if chain.len() < 2 {
            // A single-sensor chain is trivially the identity chain.
            self.phase = CalibrationPhase::Complete;
            self.pending.push(CalibrationEvent::RunComplete);
            return;
        }

        log::info!("starting calibration run over {} sensor pairs", chain.len() - 1);
        self.phase = CalibrationPhase::AwaitingMarker { pair: 0 };
        self.pending.push(CalibrationEvent::ShowMarker { pair: 0 });
    }

    /// Operator confirmation that the marker is placed for the current pair.
    /// Takes effect on the next tick.
    pub fn confirm_marker(&mut self) {
        self.marker_confirmed = true;
    }

    /// Abort a run in progress. The chain is reset to identity.
    pub fn cancel(&mut self, chain: &mut TransformationChain, modes: &mut ModeController) {
        if !self.phase.is_running() {
            return;
        }
        if let CalibrationPhase::Capturing { .. } = self.phase {
            modes.request_idle();
        }
        chain.reset();
        self.phase = CalibrationPhase::Idle;
        self.marker_confirmed = false;
        log::info!("calibration run cancelled");
    }

    /// Advance the state machine by one tick. Called by the dispatch loop
    /// before it reads sensors, so transitions apply at tick boundaries.
    pub fn update(
        &mut self,
        samples: &mut CalibrationSampleBuffer,
        chain: &mut TransformationChain,
        modes: &mut ModeController,
        routine: &mut dyn PairCalibrator,
        descriptors: &[SensorDescriptor],
    ) -> Vec<CalibrationEvent> {
        match self.phase {
            CalibrationPhase::AwaitingMarker { pair } if self.marker_confirmed => {
                self.marker_confirmed = false;
                self.begin_attempt(pair, 1, samples, modes);
            }
            CalibrationPhase::Capturing { pair, attempt } if samples.pair_valid(pair) => {
                // Both frames are in; leave capture mode before running the
                // external routine.
                modes.request_idle();

                let reference = PairObservation {
                    depth: &samples.sample(pair).depth,
                    color: &samples.sample(pair).color,
                    descriptor: &descriptors[pair],
                };
                let target = PairObservation {
                    depth: &samples.sample(pair + 1).depth,
                    color: &samples.sample(pair + 1).color,
                    descriptor: &descriptors[pair + 1],
                };

                match routine.calibrate_pair(reference, target, &self.marker) {
                    Some(pairwise) => {
                        chain.compose(pair, pairwise);
                        self.pending.push(CalibrationEvent::PairCalibrated {
                            pair,
                            attempts: attempt,
                        });

                        let next = pair + 1;
                        if next < chain.len() - 1 {
                            self.phase = CalibrationPhase::AwaitingMarker { pair: next };
                            self.pending.push(CalibrationEvent::ShowMarker { pair: next });
                        } else {
                            self.phase = CalibrationPhase::Complete;
                            self.pending.push(CalibrationEvent::RunComplete);
                        }
                    }
                    None if attempt >= self.max_attempts => {
                        self.pending.push(CalibrationEvent::PairFailed {
                            pair,
                            attempts: attempt,
                        });
                        // Discard fully: no partial chain survives an abort.
                        chain.reset();
                        self.phase = CalibrationPhase::Failed { pair };
                        self.pending.push(CalibrationEvent::RunAborted { pair });
                    }
                    None => {
                        log::debug!(
                            "pair {} calibration attempt {} failed, retrying",
                            pair,
                            attempt
                        );
                        self.begin_attempt(pair, attempt + 1, samples, modes);
                    }
                }
            }
            _ => {}
        }

        std::mem::take(&mut self.pending)
    }

    fn begin_attempt(
        &mut self,
        pair: usize,
        attempt: u32,
        samples: &mut CalibrationSampleBuffer,
        modes: &mut ModeController,
    ) {
        samples.invalidate_pair(pair);
        if let Err(e) = modes.request_calibration_capture() {
            // Only reachable if reconstruction started mid-run, which the
            // command layer rejects; treat it as a cancelled run.
            log::error!("cannot enter capture mode: {}", e);
            self.phase = CalibrationPhase::Idle;
            return;
        }
        self.phase = CalibrationPhase::Capturing { pair, attempt };
    }
}
