use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Where inference runs. Selection changes latency, never output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    #[default]
    Cpu,
    Gpu,
}

/// A raw output tensor as produced by the network.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// A `[rows, columns]` tensor from row vectors of equal width.
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        let data = rows.iter().flat_map(|row| row.iter().copied()).collect();
        Self {
            shape: vec![rows.len(), columns],
            data,
        }
    }
}

/// Inference backend trait.
///
/// Backends receive an image already resized to `input_size()` and return the
/// network's output heads untouched. Shape handling lives in the detector so
/// every backend is held to one output contract.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Network input resolution as `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    /// Execution target actually in use.
    fn execution_target(&self) -> ExecutionTarget {
        ExecutionTarget::Cpu
    }

    /// Run one forward pass.
    fn infer(&mut self, input: &RgbImage) -> Result<Vec<RawTensor>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
