//! Mode-gated frame dispatch.
//!
//! One tick = drain control commands, step the calibrator, then read one
//! frame pair from every sensor and dispatch it according to the current
//! mode. Everything runs on a single thread; mode and chain have exactly one
//! writer each and transitions only take effect at tick boundaries.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use glam::DVec3;

use crate::calibration::{
    load_chain, save_chain, CalibrationEvent, ChainCalibrator, CalibrationSampleBuffer,
    PairCalibrator, TransformationChain,
};
use crate::config::RigConfig;
use crate::error::{Error, Result};
use crate::reconstruction::{
    export_flip, ReconstructionBackend, ReconstructionService, TrackingStatus,
};
use crate::sensor::{PreviewImage, SensorContext, SensorDescriptor};

/// The one activity the rig is performing. Exactly one is active at any
/// instant; illegal combinations are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    CaptureCalibration,
    Reconstruct,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::CaptureCalibration => write!(f, "calibration capture"),
            Mode::Reconstruct => write!(f, "reconstruction"),
        }
    }
}

/// Holds the current [`Mode`] and authorizes transitions.
pub struct ModeController {
    mode: Mode,
}

impl ModeController {
    pub fn new() -> Self {
        Self { mode: Mode::Idle }
    }

    pub fn current(&self) -> Mode {
        self.mode
    }

    /// Enter calibration capture. Rejected while reconstruction is active.
    pub fn request_calibration_capture(&mut self) -> Result<()> {
        if self.mode == Mode::Reconstruct {
            return Err(Error::ModeConflict {
                requested: Mode::CaptureCalibration,
                active: self.mode,
            });
        }
        self.mode = Mode::CaptureCalibration;
        Ok(())
    }

    /// Enter reconstruction. Rejected while calibration capture is in
    /// progress.
    pub fn request_reconstruction(&mut self) -> Result<()> {
        if self.mode == Mode::CaptureCalibration {
            return Err(Error::ModeConflict {
                requested: Mode::Reconstruct,
                active: self.mode,
            });
        }
        self.mode = Mode::Reconstruct;
        Ok(())
    }

    /// Return to idle. Always succeeds; returns the mode that was active so
    /// the caller can tear down its per-mode resources.
    pub fn request_idle(&mut self) -> Mode {
        std::mem::replace(&mut self.mode, Mode::Idle)
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands from the user-facing control surface. Applied at the start of
/// the next tick, never mid-tick.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    BeginCalibration,
    /// Operator confirmation that the marker is placed for the current pair.
    ConfirmMarker,
    CancelCalibration,
    SaveCalibration(PathBuf),
    LoadCalibration(PathBuf),
    StartReconstruction,
    StopReconstruction,
    Shutdown,
}

/// The periodic driver: owns the sensors, the chain, the sample buffer and
/// the mode state, and routes every frame pair to exactly one activity.
pub struct FrameDispatchLoop {
    sensors: Vec<SensorContext>,
    descriptors: Vec<SensorDescriptor>,
    chain: TransformationChain,
    samples: CalibrationSampleBuffer,
    modes: ModeController,
    calibrator: ChainCalibrator,
    routine: Box<dyn PairCalibrator>,
    backend: Box<dyn ReconstructionBackend>,
    session: Option<Box<dyn ReconstructionService>>,
    commands: Receiver<ControlCommand>,
    config: RigConfig,
    running: bool,
}

impl FrameDispatchLoop {
    pub fn new(
        sensors: Vec<SensorContext>,
        descriptors: Vec<SensorDescriptor>,
        routine: Box<dyn PairCalibrator>,
        backend: Box<dyn ReconstructionBackend>,
        commands: Receiver<ControlCommand>,
        config: RigConfig,
    ) -> Self {
        let chain = TransformationChain::identity(sensors.len());
        let samples = CalibrationSampleBuffer::new(&descriptors);
        let calibrator = ChainCalibrator::new(config.marker.clone(), config.max_attempts);
        Self {
            sensors,
            descriptors,
            chain,
            samples,
            modes: ModeController::new(),
            calibrator,
            routine,
            backend,
            session: None,
            commands,
            config,
            running: true,
        }
    }

    pub fn mode(&self) -> Mode {
        self.modes.current()
    }

    pub fn chain(&self) -> &TransformationChain {
        &self.chain
    }

    pub fn samples(&self) -> &CalibrationSampleBuffer {
        &self.samples
    }

    pub fn calibrator(&self) -> &ChainCalibrator {
        &self.calibrator
    }

    /// Preview rendering for one sensor, written by the fusion engine.
    pub fn preview(&self, sensor: usize) -> &PreviewImage {
        &self.sensors[sensor].preview
    }

    /// Run ticks at the configured period until shut down.
    pub fn run(&mut self) {
        let period = self.config.tick_period();
        log::info!(
            "dispatch loop running over {} sensors at {:?} per tick",
            self.sensors.len(),
            period
        );
        while self.running {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        log::info!("dispatch loop stopped");
    }

    /// One full pass: commands, calibrator step, sensor reads, dispatch.
    pub fn tick(&mut self) {
        self.drain_commands();

        let events = self.calibrator.update(
            &mut self.samples,
            &mut self.chain,
            &mut self.modes,
            self.routine.as_mut(),
            &self.descriptors,
        );
        for event in events {
            self.report(event);
        }

        let timeout = self.config.read_timeout();
        for i in 0..self.sensors.len() {
            let context = &mut self.sensors[i];
            if !context.has_buffers() {
                continue;
            }

            // A failed read skips this sensor for this tick only; the pass
            // over the remaining sensors always completes.
            if !context.handle.read_image(&mut context.depth, &mut context.color, timeout) {
                log::debug!("sensor {}: frame read failed, skipping tick", i);
                continue;
            }

            match self.modes.current() {
                Mode::Reconstruct => {
                    if let Some(session) = self.session.as_mut() {
                        match session.add_frame(
                            i,
                            &context.depth,
                            &context.color,
                            &self.chain.pose(i),
                            &mut context.preview,
                        ) {
                            Ok(TrackingStatus::Tracking) => {
                                // Preview buffer now holds the model rendering.
                            }
                            Ok(TrackingStatus::Lost) => {
                                log::debug!("sensor {}: tracking lost", i);
                            }
                            Err(e) => {
                                log::warn!("sensor {}: fusion rejected frame: {}", i, e);
                            }
                        }
                    }
                }
                Mode::CaptureCalibration => {
                    self.samples.store(i, &context.depth, &context.color);
                }
                Mode::Idle => {
                    // Raw frame stays available for preview; no side effect.
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if let Err(e) = self.handle_command(command) {
                        log::error!("command rejected: {}", e);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running = false;
                    break;
                }
            }
        }
    }

    fn handle_command(&mut self, command: ControlCommand) -> Result<()> {
        match command {
            ControlCommand::BeginCalibration => {
                if self.modes.current() == Mode::Reconstruct {
                    return Err(Error::ModeConflict {
                        requested: Mode::CaptureCalibration,
                        active: Mode::Reconstruct,
                    });
                }
                self.calibrator.start(&mut self.chain);
            }
            ControlCommand::ConfirmMarker => {
                self.calibrator.confirm_marker();
            }
            ControlCommand::CancelCalibration => {
                self.calibrator.cancel(&mut self.chain, &mut self.modes);
            }
            ControlCommand::SaveCalibration(path) => {
                let mut file = File::create(&path)?;
                save_chain(&self.chain, &mut file)?;
                log::info!("saved calibration to {}", path.display());
            }
            ControlCommand::LoadCalibration(path) => {
                let file = BufReader::new(File::open(&path)?);
                // load_chain builds into a temporary; the active chain is
                // only replaced on full success.
                self.chain = load_chain(file, self.sensors.len())?;
                log::info!("loaded calibration from {}", path.display());
            }
            ControlCommand::StartReconstruction => {
                self.modes.request_reconstruction()?;
                self.session = None;
                match self.backend.start_session(&self.descriptors, &self.config.volume) {
                    Ok(session) => {
                        self.session = Some(session);
                        log::info!("reconstruction started");
                    }
                    Err(e) => {
                        self.modes.request_idle();
                        return Err(e);
                    }
                }
            }
            ControlCommand::StopReconstruction => {
                self.stop_reconstruction()?;
            }
            ControlCommand::Shutdown => {
                self.running = false;
            }
        }
        Ok(())
    }

    /// End the reconstruction session, retrieve the mesh, apply the fixed
    /// 180 degree x-axis flip and export it.
    fn stop_reconstruction(&mut self) -> Result<()> {
        if self.modes.current() == Mode::Reconstruct {
            self.modes.request_idle();
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        // The session is consumed either way; a retrieval failure writes
        // nothing.
        let mut mesh = session.get_mesh().map_err(|_| Error::MeshRetrievalFailed)?;
        log::info!(
            "reconstructed mesh ({} vertices, {} triangles)",
            mesh.vertex_count(),
            mesh.triangle_count()
        );

        mesh.apply_transform(export_flip(), DVec3::ZERO);
        mesh.save(&self.config.mesh_path)?;
        log::info!("saved mesh to {}", self.config.mesh_path.display());
        Ok(())
    }

    fn report(&self, event: CalibrationEvent) {
        match event {
            CalibrationEvent::ShowMarker { pair } => {
                log::info!(
                    "show the calibration marker to sensors {} and {}, then confirm",
                    pair + 1,
                    pair + 2
                );
            }
            CalibrationEvent::PairCalibrated { pair, attempts } => {
                log::info!(
                    "calibration between sensors {} and {} succeeded after {} attempt(s)",
                    pair + 1,
                    pair + 2,
                    attempts
                );
            }
            CalibrationEvent::PairFailed { pair, attempts } => {
                log::error!(
                    "calibration between sensors {} and {} failed after {} attempts",
                    pair + 1,
                    pair + 2,
                    attempts
                );
            }
            CalibrationEvent::RunComplete => {
                log::info!("calibration succeeded");
            }
            CalibrationEvent::RunAborted { .. } => {
                log::error!("calibration failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedReconstruction, SyntheticPairCalibrator, SyntheticSensor};
    use crossbeam_channel::Sender;
    use glam::DMat4;

    fn build_rig(
        sensors: Vec<Box<dyn crate::sensor::SensorHandle>>,
        config: RigConfig,
    ) -> (FrameDispatchLoop, Sender<ControlCommand>) {
        let mut contexts = Vec::new();
        let mut descriptors = Vec::new();
        for (i, handle) in sensors.into_iter().enumerate() {
            let (context, descriptor) = SensorContext::open(handle, i).unwrap();
            contexts.push(context);
            descriptors.push(descriptor);
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let rig = FrameDispatchLoop::new(
            contexts,
            descriptors,
            Box::new(SyntheticPairCalibrator::default()),
            Box::new(SimulatedReconstruction),
            rx,
            config,
        );
        (rig, tx)
    }

    fn synthetic(n: usize) -> Vec<Box<dyn crate::sensor::SensorHandle>> {
        (0..n)
            .map(|i| Box::new(SyntheticSensor::new(i)) as Box<dyn crate::sensor::SensorHandle>)
            .collect()
    }

    #[test]
    fn test_mode_exclusivity_both_directions() {
        let mut modes = ModeController::new();

        modes.request_calibration_capture().unwrap();
        let err = modes.request_reconstruction().unwrap_err();
        assert!(matches!(err, Error::ModeConflict { .. }));
        assert_eq!(modes.current(), Mode::CaptureCalibration);

        modes.request_idle();
        modes.request_reconstruction().unwrap();
        let err = modes.request_calibration_capture().unwrap_err();
        assert!(matches!(err, Error::ModeConflict { .. }));
        assert_eq!(modes.current(), Mode::Reconstruct);
    }

    #[test]
    fn test_read_failure_is_isolated_per_sensor() {
        let sensors: Vec<Box<dyn crate::sensor::SensorHandle>> = vec![
            Box::new(SyntheticSensor::new(0)),
            Box::new(SyntheticSensor::new(1)),
            Box::new(SyntheticSensor::failing(2)),
            Box::new(SyntheticSensor::new(3)),
        ];
        let (mut rig, tx) = build_rig(sensors, RigConfig::default());

        tx.send(ControlCommand::BeginCalibration).unwrap();
        rig.tick(); // prompt emitted
        tx.send(ControlCommand::ConfirmMarker).unwrap();
        rig.tick(); // capture mode entered, frames stored

        assert_eq!(rig.mode(), Mode::CaptureCalibration);
        assert!(rig.samples().is_valid(0));
        assert!(rig.samples().is_valid(1));
        assert!(!rig.samples().is_valid(2));
        assert!(rig.samples().is_valid(3));
    }

    #[test]
    fn test_begin_calibration_rejected_during_reconstruction() {
        let (mut rig, tx) = build_rig(synthetic(2), RigConfig::default());

        tx.send(ControlCommand::StartReconstruction).unwrap();
        rig.tick();
        assert_eq!(rig.mode(), Mode::Reconstruct);

        tx.send(ControlCommand::BeginCalibration).unwrap();
        rig.tick();
        // Rejected: no run started, mode unchanged.
        assert!(!rig.calibrator().phase().is_running());
        assert_eq!(rig.mode(), Mode::Reconstruct);
    }

    #[test]
    fn test_full_calibration_run_composes_chain() {
        let (mut rig, tx) = build_rig(synthetic(3), RigConfig::default());

        tx.send(ControlCommand::BeginCalibration).unwrap();
        for _ in 0..20 {
            // The rig confirms nothing by itself; push a confirmation every
            // tick as an eager operator would.
            tx.send(ControlCommand::ConfirmMarker).unwrap();
            rig.tick();
        }

        assert_eq!(rig.mode(), Mode::Idle);
        assert_eq!(rig.chain().pose(0), DMat4::IDENTITY);
        let expected = DMat4::from_translation(glam::DVec3::new(400.0, 0.0, 0.0));
        assert_eq!(rig.chain().pose(1), expected);
        assert_eq!(rig.chain().pose(2), expected * expected);
    }

    #[test]
    fn test_reconstruction_dispatch_writes_previews() {
        let (mut rig, tx) = build_rig(synthetic(2), RigConfig::default());

        tx.send(ControlCommand::StartReconstruction).unwrap();
        rig.tick();

        // The simulated engine tints the color frame into the preview; a
        // fused tick leaves a fully opaque preview.
        assert!(rig.preview(0).pixels().all(|p| p.0[3] == 255));
        assert!(rig.preview(1).pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn test_stop_reconstruction_exports_flipped_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let config = RigConfig {
            mesh_path: dir.path().join("mesh.ply"),
            ..Default::default()
        };
        let (mut rig, tx) = build_rig(synthetic(2), config);

        tx.send(ControlCommand::StartReconstruction).unwrap();
        rig.tick();
        tx.send(ControlCommand::StopReconstruction).unwrap();
        rig.tick();

        assert_eq!(rig.mode(), Mode::Idle);
        let contents = std::fs::read_to_string(dir.path().join("mesh.ply")).unwrap();
        assert!(contents.starts_with("ply\n"));
        assert!(contents.contains("element vertex 8"));
    }

    #[test]
    fn test_load_failure_preserves_active_chain() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("truncated.txt");
        std::fs::write(&bad, "1 0 0 0\n0 1 0 0\n").unwrap();

        let (mut rig, tx) = build_rig(synthetic(2), RigConfig::default());
        let before = rig.chain().clone();

        tx.send(ControlCommand::LoadCalibration(bad)).unwrap();
        rig.tick();

        assert_eq!(rig.chain(), &before);
    }

    #[test]
    fn test_save_load_round_trip_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.txt");

        let (mut rig, tx) = build_rig(synthetic(3), RigConfig::default());
        tx.send(ControlCommand::BeginCalibration).unwrap();
        for _ in 0..20 {
            tx.send(ControlCommand::ConfirmMarker).unwrap();
            rig.tick();
        }
        let calibrated = rig.chain().clone();

        tx.send(ControlCommand::SaveCalibration(path.clone())).unwrap();
        rig.tick();
        tx.send(ControlCommand::BeginCalibration).unwrap();
        rig.tick(); // reset to identity by the new run
        tx.send(ControlCommand::CancelCalibration).unwrap();
        rig.tick();
        tx.send(ControlCommand::LoadCalibration(path)).unwrap();
        rig.tick();

        for i in 0..3 {
            assert!(rig.chain().pose(i).abs_diff_eq(calibrated.pose(i), 1e-12));
        }
    }
}
