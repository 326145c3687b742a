//! headcountd - occupancy monitor daemon
//!
//! This daemon:
//! 1. Loads configuration (file, `HEADCOUNT_*` environment, flags)
//! 2. Loads the inference backend and opens the camera
//! 3. Runs the stream worker at the configured frame rate
//! 4. Serves the live feed and control API until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use headcount::api::{ApiConfig, ApiServer};
use headcount::detect::{load_backend, Detector};
use headcount::events::EventBus;
use headcount::ingest::{default_opener, CameraId, SourceMode};
use headcount::ui::{Ui, UiMode};
use headcount::{Monitor, MonitorConfig, StreamOrchestrator};

#[derive(Parser, Debug)]
#[command(author, version, about = "Occupancy monitor daemon")]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(long, env = "HEADCOUNT_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address for the HTTP API.
    #[arg(long)]
    addr: Option<String>,
    /// Camera: device index, device path, or stub://label for synthetic frames.
    #[arg(long)]
    camera: Option<CameraId>,
    /// ONNX person detection model. Without one the stub backend runs.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Start with person tracking enabled.
    #[arg(long)]
    track: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
        if let Some(addr) = args.addr {
            cfg.api_addr = addr;
        }
        if let Some(camera) = args.camera {
            cfg.stream.capture.camera = camera;
        }
        if let Some(model) = args.model {
            cfg.detection.model = Some(model);
        }
        cfg.validate()?;
        cfg
    };

    let detector = {
        let mut stage = ui.stage("Load detection backend");
        match load_backend(&cfg.backend_spec()) {
            Ok(backend) => Detector::new(backend, cfg.detector_settings()),
            Err(err) => {
                stage.fail(format!("{:#}", err));
                return Err(err);
            }
        }
    };

    let events = Arc::new(EventBus::new());
    let mut orchestrator = {
        let mut stage = ui.stage("Open camera");
        match StreamOrchestrator::new(
            cfg.stream.clone(),
            detector,
            default_opener(),
            cfg.orchestrator_options(),
            events.clone(),
        ) {
            Ok(orchestrator) => {
                if orchestrator.source_mode() == Some(SourceMode::Fallback) {
                    stage.note("no camera device reachable, serving synthetic frames");
                }
                orchestrator
            }
            Err(err) => {
                stage.fail(err.to_string());
                return Err(err.into());
            }
        }
    };
    orchestrator.set_tracking(args.track);
    let status = orchestrator.status();

    let monitor = Arc::new(Monitor::start(orchestrator, events)?);
    let api_handle = {
        let _stage = ui.stage("Start HTTP API");
        ApiServer::new(
            ApiConfig {
                addr: cfg.api_addr.clone(),
            },
            monitor.clone(),
        )
        .spawn()?
    };

    ui.summary(&[
        ("api", format!("http://{}", api_handle.addr)),
        ("camera", cfg.stream.capture.camera.to_string()),
        ("resolution", cfg.stream.capture.resolution.to_string()),
        ("backend", status.detector_backend.to_string()),
        ("tracking", status.tracking.to_string()),
    ]);

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("headcountd running, waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    monitor.stop()?;
    Ok(())
}
