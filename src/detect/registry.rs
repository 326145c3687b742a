use std::path::PathBuf;

use anyhow::Result;

use super::backend::{ExecutionTarget, InferenceBackend};
use super::backends::StubBackend;

/// What the detector should run on.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSpec {
    /// ONNX model file. `None` runs the stub backend.
    pub model: Option<PathBuf>,
    /// Network input as `(width, height)`.
    pub input_size: (u32, u32),
    pub target: ExecutionTarget,
}

impl Default for BackendSpec {
    fn default() -> Self {
        Self {
            model: None,
            input_size: (416, 416),
            target: ExecutionTarget::Cpu,
        }
    }
}

/// Names of the backends compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut names = vec!["stub"];
    if cfg!(feature = "backend-tract") {
        names.push("tract");
    }
    names
}

/// Build the inference backend for `spec`.
///
/// GPU execution is not available in any compiled backend; a GPU request
/// falls back to the CPU with a warning. Output does not depend on the target.
pub fn load_backend(spec: &BackendSpec) -> Result<Box<dyn InferenceBackend>> {
    if spec.target == ExecutionTarget::Gpu {
        log::warn!("gpu execution requested but unavailable; falling back to cpu");
    }
    let (width, height) = spec.input_size;

    match &spec.model {
        None => {
            log::info!("no detection model configured; using stub backend");
            Ok(Box::new(StubBackend::new(width, height)))
        }
        Some(path) => load_model(path, width, height),
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &std::path::Path, width: u32, height: u32) -> Result<Box<dyn InferenceBackend>> {
    use anyhow::Context;

    let mut backend = super::backends::TractBackend::new(path, width, height)
        .with_context(|| format!("load detection model {}", path.display()))?;
    backend.warm_up().context("model warm-up")?;
    log::info!("loaded detection model {} ({}x{})", path.display(), width, height);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &std::path::Path, width: u32, height: u32) -> Result<Box<dyn InferenceBackend>> {
    log::warn!(
        "model {} configured but this build has no onnx backend (enable `backend-tract`); using stub backend",
        path.display()
    );
    Ok(Box::new(StubBackend::new(width, height)))
}
