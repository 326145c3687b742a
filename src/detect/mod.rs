mod backend;
mod backends;
mod decode;
mod detector;
mod nms;
mod registry;
mod result;

pub use backend::{ExecutionTarget, InferenceBackend, RawTensor};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use decode::{OutputLayout, OutputOrder, PERSON_CLASS};
pub use detector::{Detector, DetectorSettings, SkipPolicy, DEFAULT_CONFIDENCE_THRESHOLD};
pub use nms::{non_max_suppression, DEFAULT_NMS_THRESHOLD};
pub use registry::{available_backends, load_backend, BackendSpec};
pub use result::{BoundingBox, Detection, DetectionSet};
