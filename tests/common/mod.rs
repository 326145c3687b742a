#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use headcount::config::StreamSettings;
use headcount::detect::{Detector, DetectorSettings, RawTensor, StubBackend};
use headcount::events::EventBus;
use headcount::frame::{Frame, FrameOrigin};
use headcount::ingest::{
    CameraDevice, CameraId, CaptureSettings, DeviceOpener, OpenStrategy, Resolution, SourceOptions,
};
use headcount::orchestrator::{OrchestratorOptions, StreamOrchestrator};

/// Counters shared by a `ScriptedOpener` and every device it hands out.
#[derive(Default)]
pub struct CameraLedger {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
}

impl CameraLedger {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

/// Opens device paths listed in `reachable`. Reads follow `script`
/// (`true` delivers a frame); once the script runs out reads use `then`.
pub struct ScriptedOpener {
    reachable: Mutex<Vec<String>>,
    script: Mutex<VecDeque<bool>>,
    then: bool,
    slow_open: Option<(String, Duration)>,
    pub ledger: Arc<CameraLedger>,
}

impl ScriptedOpener {
    pub fn new(reachable: &[&str]) -> Self {
        Self {
            reachable: Mutex::new(reachable.iter().map(|s| s.to_string()).collect()),
            script: Mutex::new(VecDeque::new()),
            then: true,
            slow_open: None,
            ledger: Arc::new(CameraLedger::default()),
        }
    }

    pub fn with_reads(mut self, script: &[bool], then: bool) -> Self {
        self.script = Mutex::new(script.iter().copied().collect());
        self.then = then;
        self
    }

    /// Opening `path` blocks for `delay` first.
    pub fn with_slow_open(mut self, path: &str, delay: Duration) -> Self {
        self.slow_open = Some((path.to_string(), delay));
        self
    }

    /// Plug in a device after construction.
    pub fn attach(&self, path: &str) {
        self.reachable.lock().unwrap().push(path.to_string());
    }

    fn next_read(&self) -> bool {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.then)
    }
}

struct ScriptedDevice {
    opener: Arc<ScriptedOpener>,
    resolution: Resolution,
    label: String,
}

impl CameraDevice for ScriptedDevice {
    fn read_frame(&mut self) -> Result<Frame> {
        self.opener.ledger.reads.fetch_add(1, Ordering::SeqCst);
        if !self.opener.next_read() {
            return Err(anyhow!("scripted read failure"));
        }
        let (w, h) = (self.resolution.width, self.resolution.height);
        Frame::new(vec![90u8; (w * h * 3) as usize], w, h, FrameOrigin::Device)
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.opener.ledger.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `DeviceOpener` adapter so the scripted opener can hand out devices that
/// point back at it.
pub struct SharedOpener(pub Arc<ScriptedOpener>);

impl DeviceOpener for SharedOpener {
    fn open(
        &self,
        strategy: &OpenStrategy,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CameraDevice>> {
        let path = match strategy {
            OpenStrategy::DevicePath(path) => path.display().to_string(),
            OpenStrategy::FallbackIndex0 => "/dev/video0".to_string(),
            _ => return Err(anyhow!("{} unsupported", strategy)),
        };
        if let Some((slow, delay)) = &self.0.slow_open {
            if *slow == path {
                std::thread::sleep(*delay);
            }
        }
        if !self.0.reachable.lock().unwrap().contains(&path) {
            return Err(anyhow!("{} not present", path));
        }
        let ledger = &self.0.ledger;
        ledger.opens.fetch_add(1, Ordering::SeqCst);
        let live = ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            opener: self.0.clone(),
            resolution: settings.resolution,
            label: path,
        }))
    }
}

pub fn small_settings(camera: CameraId) -> StreamSettings {
    let mut settings = StreamSettings::default();
    settings.capture.camera = camera;
    settings.capture.resolution = Resolution::new(64, 48);
    settings.reconnect_interval = Duration::ZERO;
    settings
}

pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        source: SourceOptions {
            require_device: false,
            reconnect_backoff: Duration::ZERO,
        },
        ..OrchestratorOptions::default()
    }
}

/// One detection row per person, spaced so NMS keeps them all.
pub fn people(n: usize) -> Vec<RawTensor> {
    let rows: Vec<Vec<f32>> = (0..n)
        .map(|i| vec![0.1 + 0.2 * i as f32, 0.5, 0.08, 0.3, 1.0, 0.9])
        .collect();
    vec![RawTensor::from_rows(&rows)]
}

pub fn build(
    settings: StreamSettings,
    backend: StubBackend,
    opener: Arc<dyn DeviceOpener>,
    events: Arc<EventBus>,
) -> StreamOrchestrator {
    build_with(settings, backend, opener, events, fast_options())
}

pub fn build_with(
    settings: StreamSettings,
    backend: StubBackend,
    opener: Arc<dyn DeviceOpener>,
    events: Arc<EventBus>,
    options: OrchestratorOptions,
) -> StreamOrchestrator {
    let detector = Detector::new(Box::new(backend), DetectorSettings::default());
    StreamOrchestrator::new(settings, detector, opener, options, events).expect("orchestrator")
}
