//! camera_probe - list which camera ids can be opened and read
//!
//! Each candidate is opened, read once and released. The daemon does not
//! need to be running; do not probe a camera the daemon currently holds.

use anyhow::Result;
use clap::Parser;

use headcount::ingest::{default_opener, probe_camera, CameraId, CaptureSettings, Resolution};
use headcount::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe camera reachability")]
struct Args {
    /// Camera ids to probe. Defaults to indexes 0..=max-index.
    #[arg(value_name = "CAMERA")]
    cameras: Vec<CameraId>,
    /// Highest index probed when no ids are given.
    #[arg(long, default_value_t = 3)]
    max_index: u32,
    /// Resolution requested from each device.
    #[arg(long, default_value = "640x480")]
    resolution: Resolution,
    /// Emit one JSON object per line instead of a table.
    #[arg(long)]
    json: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let candidates = if args.cameras.is_empty() {
        (0..=args.max_index).map(CameraId::Index).collect()
    } else {
        args.cameras
    };

    let opener = default_opener();
    let mut reachable = 0usize;
    let mut rows = Vec::with_capacity(candidates.len());
    {
        let _stage = ui.stage("Probe cameras");
        for camera in candidates {
            let settings = CaptureSettings {
                camera: camera.clone(),
                resolution: args.resolution,
                ..CaptureSettings::default()
            };
            let outcome = probe_camera(opener.as_ref(), &settings);
            if outcome.is_ok() {
                reachable += 1;
            }
            rows.push((camera, outcome));
        }
    }

    for (camera, outcome) in &rows {
        if args.json {
            let line = match outcome {
                Ok(resolution) => serde_json::json!({
                    "camera": camera,
                    "success": true,
                    "resolution": resolution,
                }),
                Err(err) => serde_json::json!({
                    "camera": camera,
                    "success": false,
                    "message": err.to_string(),
                }),
            };
            println!("{}", line);
        } else {
            match outcome {
                Ok(resolution) => println!("{:<16} ok    {}", camera.to_string(), resolution),
                Err(err) => println!("{:<16} fail  {}", camera.to_string(), err),
            }
        }
    }
    log::info!("{} of {} cameras reachable", reachable, rows.len());
    Ok(())
}
