use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::detect::backend::{InferenceBackend, RawTensor};

/// Stub backend for testing and for running without a model.
///
/// Replays scripted outputs in order; once the script is exhausted every call
/// yields an empty output, which decodes to no detections.
pub struct StubBackend {
    input_size: (u32, u32),
    script: VecDeque<std::result::Result<Vec<RawTensor>, String>>,
    calls: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new(input_width: u32, input_height: u32) -> Self {
        Self {
            input_size: (input_width, input_height),
            script: VecDeque::new(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue the output of the next forward pass.
    pub fn push_output(&mut self, output: Vec<RawTensor>) {
        self.script.push_back(Ok(output));
    }

    /// Queue a failing forward pass.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(message.into()));
    }

    pub fn with_output(mut self, output: Vec<RawTensor>) -> Self {
        self.push_output(output);
        self
    }

    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.push_failure(message);
        self
    }

    /// Shared counter of forward passes, readable after the backend is boxed.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(416, 416)
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&mut self, input: &RgbImage) -> Result<Vec<RawTensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.dimensions() != self.input_size {
            return Err(anyhow!(
                "input {}x{} does not match backend input {}x{}",
                input.width(),
                input.height(),
                self.input_size.0,
                self.input_size.1
            ));
        }
        match self.script.pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}
