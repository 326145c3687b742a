//! The stream worker thread.
//!
//! One thread runs `StreamOrchestrator::run_cycle` back to back, paced to the
//! configured frame rate, and hands each encoded frame to the `FrameFeed`.
//! Control calls lock the same orchestrator, so they wait for an in-flight
//! cycle and never observe half a cycle.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::events::EventBus;
use crate::feed::FrameFeed;
use crate::ingest::CameraId;
use crate::orchestrator::{CameraProbe, CameraTest, StreamOrchestrator};

/// A running stream: orchestrator, worker thread, frame feed and event bus.
pub struct Monitor {
    orchestrator: Arc<Mutex<StreamOrchestrator>>,
    feed: Arc<FrameFeed>,
    events: Arc<EventBus>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Spawn the worker. `events` must be the bus the orchestrator publishes to.
    pub fn start(orchestrator: StreamOrchestrator, events: Arc<EventBus>) -> Result<Self> {
        let orchestrator = Arc::new(Mutex::new(orchestrator));
        let feed = Arc::new(FrameFeed::new());
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let orchestrator = orchestrator.clone();
            let feed = feed.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("headcount-stream".into())
                .spawn(move || run_worker(orchestrator, feed, stop))?
        };

        Ok(Self {
            orchestrator,
            feed,
            events,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Lock the orchestrator for a control operation.
    pub fn lock(&self) -> Result<MutexGuard<'_, StreamOrchestrator>> {
        self.orchestrator
            .lock()
            .map_err(|_| anyhow!("stream orchestrator lock poisoned"))
    }

    /// Run `f` with exclusive access to the orchestrator.
    pub fn with<R>(&self, f: impl FnOnce(&mut StreamOrchestrator) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Check a candidate camera. The device is opened and read with the
    /// orchestrator unlocked, so capture cycles keep running meanwhile.
    pub fn test_camera(&self, camera: CameraId) -> Result<CameraProbe> {
        let pending = match self.with(|orch| orch.begin_camera_test(camera))? {
            CameraTest::Finished(probe) => return Ok(probe),
            CameraTest::Pending(pending) => pending,
        };
        let outcome = pending.run();
        self.with(|orch| orch.finish_camera_test(&pending, outcome))
    }

    pub fn feed(&self) -> &Arc<FrameFeed> {
        &self.feed
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    /// Stop the worker and release the camera. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self
            .worker
            .lock()
            .map_err(|_| anyhow!("worker handle lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("stream worker thread panicked"))?;
        }
        self.feed.close();
        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("stream worker stop failed: {}", err);
        }
    }
}

fn run_worker(
    orchestrator: Arc<Mutex<StreamOrchestrator>>,
    feed: Arc<FrameFeed>,
    stop: Arc<AtomicBool>,
) {
    log::info!("stream worker started");
    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        let (frame, interval) = match orchestrator.lock() {
            Ok(mut orch) => {
                let frame = orch.run_cycle();
                (frame, orch.settings().frame_interval())
            }
            Err(_) => {
                log::error!("stream orchestrator lock poisoned; worker exiting");
                break;
            }
        };
        feed.publish(frame);
        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }

    match orchestrator.lock() {
        Ok(mut orch) => orch.shutdown(),
        Err(_) => log::error!("stream orchestrator lock poisoned during shutdown"),
    }
    feed.close();
    log::info!("stream worker stopped");
}
