//! Multi-sensor reconstruction rig.
//!
//! Entry point: opens the sensors, wires the control surface to the dispatch
//! loop and runs it until shutdown. Runs against the simulated collaborators;
//! hardware backends plug in behind the same traits.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use crossbeam_channel::Sender;

use multicam_recon::config::RigConfig;
use multicam_recon::dispatch::{ControlCommand, FrameDispatchLoop};
use multicam_recon::sensor::{SensorContext, SensorHandle};
use multicam_recon::sim::{SimulatedReconstruction, SyntheticPairCalibrator, SyntheticSensor};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("multicam-recon {} starting", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => RigConfig::load(Path::new(&path))
            .with_context(|| format!("loading config from {}", path))?,
        None => RigConfig::default(),
    };

    log::info!("found {} sensors", config.sensor_count);
    if config.sensor_count < 2 {
        bail!("at least two sensors are required");
    }

    // Open every sensor and capture its parameters. Any open failure is
    // fatal for the whole session.
    let mut contexts = Vec::new();
    let mut descriptors = Vec::new();
    for i in 0..config.sensor_count {
        let handle: Box<dyn SensorHandle> = Box::new(SyntheticSensor::new(i));
        let (context, descriptor) =
            SensorContext::open(handle, i).with_context(|| format!("opening sensor {}", i))?;
        contexts.push(context);
        descriptors.push(descriptor);
    }

    let (tx, rx) = crossbeam_channel::bounded(16);
    spawn_control_surface(tx, &config);

    let mut rig = FrameDispatchLoop::new(
        contexts,
        descriptors,
        Box::new(SyntheticPairCalibrator::default()),
        Box::new(SimulatedReconstruction),
        rx,
        config,
    );
    rig.run();

    log::info!("multicam-recon exiting");
    Ok(())
}

/// Read single-letter commands from stdin and forward them to the rig.
fn spawn_control_surface(tx: Sender<ControlCommand>, config: &RigConfig) {
    let calibration_path: PathBuf = config.calibration_path.clone();

    println!("commands: c=calibrate  m=confirm marker  a=abort calibration");
    println!("          s=save calibration  l=load calibration");
    println!("          r=start reconstruction  x=stop reconstruction  q=quit");

    std::thread::Builder::new()
        .name("control-surface".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "c" => ControlCommand::BeginCalibration,
                    "m" => ControlCommand::ConfirmMarker,
                    "a" => ControlCommand::CancelCalibration,
                    "s" => ControlCommand::SaveCalibration(calibration_path.clone()),
                    "l" => ControlCommand::LoadCalibration(calibration_path.clone()),
                    "r" => ControlCommand::StartReconstruction,
                    "x" => ControlCommand::StopReconstruction,
                    "q" => ControlCommand::Shutdown,
                    "" => continue,
                    other => {
                        log::warn!("unknown command '{}'", other);
                        continue;
                    }
                };
                let quitting = matches!(command, ControlCommand::Shutdown);
                if tx.send(command).is_err() || quitting {
                    break;
                }
            }
        })
        .expect("failed to spawn control surface thread");
}
