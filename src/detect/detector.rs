use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use super::backend::{ExecutionTarget, InferenceBackend};
use super::decode::{output_rows, person_candidates, OutputLayout, OutputOrder};
use super::nms::{non_max_suppression, DEFAULT_NMS_THRESHOLD};
use super::result::DetectionSet;
use crate::error::DetectionError;
use crate::frame::Frame;

/// Confidence threshold used when nothing else is configured.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Frame-skip policy.
///
/// Inference runs on one call out of every `infer_every`. A skipped call
/// reuses the cached result only while it is younger than `max_staleness`;
/// otherwise inference runs anyway.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipPolicy {
    pub infer_every: u32,
    #[serde(with = "millis")]
    pub max_staleness: Duration,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            infer_every: 1,
            max_staleness: Duration::from_millis(100),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub layout: OutputLayout,
    pub order: OutputOrder,
    pub skip: SkipPolicy,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            layout: OutputLayout::default(),
            order: OutputOrder::default(),
            skip: SkipPolicy::default(),
        }
    }
}

struct CachedDetections {
    detections: DetectionSet,
    threshold: f32,
    frame_size: (u32, u32),
    computed_at: Instant,
}

/// Person detector: backend forward pass, decode, threshold, NMS.
pub struct Detector {
    backend: Box<dyn InferenceBackend>,
    settings: DetectorSettings,
    calls: u64,
    cache: Option<CachedDetections>,
    last_reused: bool,
}

impl Detector {
    pub fn new(backend: Box<dyn InferenceBackend>, settings: DetectorSettings) -> Self {
        Self {
            backend,
            settings,
            calls: 0,
            cache: None,
            last_reused: false,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn execution_target(&self) -> ExecutionTarget {
        self.backend.execution_target()
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.settings.confidence_threshold
    }

    /// Change the instance default threshold. Cached results computed with
    /// another threshold stop matching on their own.
    pub fn set_confidence_threshold(&mut self, threshold: f32) {
        self.settings.confidence_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn set_skip_policy(&mut self, skip: SkipPolicy) {
        self.settings.skip = skip;
    }

    /// Drop the cached result so the next call always runs inference.
    pub fn reset_cache(&mut self) {
        self.cache = None;
        self.calls = 0;
    }

    /// Whether the most recent call returned a cached result.
    pub fn last_call_reused(&self) -> bool {
        self.last_reused
    }

    /// Detect people in `frame`. Never fails: any internal error yields an
    /// empty set.
    pub fn detect(&mut self, frame: &Frame, threshold: Option<f32>) -> DetectionSet {
        match self.try_detect(frame, threshold) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detection failed: {}", err);
                DetectionSet::new()
            }
        }
    }

    /// Detect people in `frame`, reporting failures to the caller.
    pub fn try_detect(
        &mut self,
        frame: &Frame,
        threshold: Option<f32>,
    ) -> Result<DetectionSet, DetectionError> {
        self.last_reused = false;
        let threshold = match threshold {
            Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
            _ => self.settings.confidence_threshold,
        };
        let view = frame.view().ok_or_else(|| {
            DetectionError::InvalidFrame(format!("{}x{} frame", frame.width, frame.height))
        })?;
        let frame_size = (frame.width, frame.height);

        let every = u64::from(self.settings.skip.infer_every.max(1));
        let skipped = self.calls % every != 0;
        self.calls = self.calls.wrapping_add(1);
        if skipped {
            if let Some(cached) = self.reusable(threshold, frame_size) {
                self.last_reused = true;
                return Ok(cached);
            }
        }

        let (input_w, input_h) = self.backend.input_size();
        if input_w == 0 || input_h == 0 {
            return Err(DetectionError::Inference(format!(
                "backend {} reports a zero input size",
                self.backend.name()
            )));
        }
        let input = imageops::resize(&view, input_w, input_h, FilterType::Triangle);

        let outcome = self
            .backend
            .infer(&input)
            .map_err(|err| DetectionError::Inference(format!("{:#}", err)))
            .and_then(|outputs| output_rows(&outputs, self.settings.layout, self.settings.order))
            .and_then(|rows| {
                person_candidates(
                    &rows,
                    self.settings.layout,
                    (input_w, input_h),
                    frame_size,
                    threshold,
                )
            });

        match outcome {
            Ok(candidates) => {
                let detections = non_max_suppression(candidates, self.settings.nms_threshold);
                self.cache = Some(CachedDetections {
                    detections: detections.clone(),
                    threshold,
                    frame_size,
                    computed_at: Instant::now(),
                });
                Ok(detections)
            }
            Err(err) => {
                self.cache = None;
                Err(err)
            }
        }
    }

    fn reusable(&self, threshold: f32, frame_size: (u32, u32)) -> Option<DetectionSet> {
        let cached = self.cache.as_ref()?;
        let fresh = cached.computed_at.elapsed() < self.settings.skip.max_staleness;
        let same_threshold = (cached.threshold - threshold).abs() <= f32::EPSILON;
        (fresh && same_threshold && cached.frame_size == frame_size)
            .then(|| cached.detections.clone())
    }
}
