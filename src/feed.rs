//! Latest encoded frame, shared with stream clients.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::frame::EncodedFrame;

#[derive(Default)]
struct Slot {
    frame: Option<EncodedFrame>,
    seq: u64,
    closed: bool,
}

/// Single-slot frame feed. The writer replaces the slot; readers wait on the
/// sequence number and never block the writer beyond the slot swap.
#[derive(Default)]
pub struct FrameFeed {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish a frame and wake readers. Returns its sequence number.
    pub fn publish(&self, frame: EncodedFrame) -> u64 {
        let seq = {
            let mut slot = self.lock();
            slot.seq += 1;
            slot.frame = Some(frame);
            slot.seq
        };
        self.ready.notify_all();
        seq
    }

    /// Most recent frame with its sequence number.
    pub fn latest(&self) -> Option<(u64, EncodedFrame)> {
        let slot = self.lock();
        slot.frame.clone().map(|frame| (slot.seq, frame))
    }

    /// Wait for a frame newer than `last_seq`. Returns `None` on timeout or
    /// once the feed is closed.
    pub fn wait_next(&self, last_seq: u64, timeout: Duration) -> Option<(u64, EncodedFrame)> {
        let guard = self.lock();
        let (slot, _) = match self.ready.wait_timeout_while(guard, timeout, |slot| {
            !slot.closed && (slot.seq <= last_seq || slot.frame.is_none())
        }) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.closed || slot.seq <= last_seq {
            return None;
        }
        slot.frame.clone().map(|frame| (slot.seq, frame))
    }

    /// Wake every waiting reader for good.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
