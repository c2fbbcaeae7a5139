//! stopsignd - stop-sign controller daemon
//!
//! This daemon:
//! 1. Loads and validates configuration (fatal on error)
//! 2. Loads the detector model and opens the camera (fatal on error)
//! 3. Connects the serial link (degraded mode on error)
//! 4. Runs the control loop until Ctrl-C
//! 5. Stops the camera, sends the fail-safe move byte and closes the link

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;

use stopsign_controller::{
    init_logging, open_capture_device, ControllerConfig, Detector, FrameSource, Orchestrator,
    OrchestratorSettings, SignalSink, SourceSettings, StabilityController,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stop-sign detector driving a serial actuator")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "STOPSIGN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level (error, warn, info, debug, trace).
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// Run without opening the serial port.
    #[arg(long)]
    no_serial: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match ControllerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .init();
            log::error!("initialization failed due to config error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Err(err) = init_logging(&config.logging) {
        eprintln!("stopsignd: {:#}", err);
        return ExitCode::FAILURE;
    }

    match run(&config, !args.no_serial) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}. exiting.", err);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &ControllerConfig, connect_serial: bool) -> Result<()> {
    let detector = Detector::from_settings(&config.detection)
        .context("failed to initialise detector")?;
    let device = open_capture_device(&config.camera)?;
    let source = FrameSource::new(device, SourceSettings::from(&config.camera));
    let sink = SignalSink::new(config.serial.clone());
    let controller = StabilityController::new(config.control.stop_duration);

    let mut orchestrator = Orchestrator::new(
        source,
        detector,
        controller,
        sink,
        OrchestratorSettings::from(&config.control),
    );
    // Installed before start so an early Ctrl-C still ends in an orderly shutdown.
    let stop = orchestrator.stop_handle();
    ctrlc::set_handler(move || stop.request_stop()).context("install Ctrl-C handler")?;

    orchestrator
        .start(connect_serial)
        .context("failed to start vision module")?;

    log::info!("system is running. press Ctrl-C to exit.");
    let summary = orchestrator.run();
    log::info!(
        "stopsignd exiting: {} iterations, {} stop signals",
        summary.iterations,
        summary.stop_signals
    );
    Ok(())
}
