//! Object detection.
//!
//! - `NetworkConfig`: input geometry and output layers, parsed from the network config
//! - `InferenceBackend`: runs the network (darknet via OpenCV, ONNX via tract, scripted for tests)
//! - `DetectionModel`: backend + config + labels; thresholding, box conversion, NMS

mod backend;
pub mod backends;
mod model;
mod network;
mod nms;
mod preprocess;
mod registry;
mod result;

pub use backend::{InferenceBackend, InputTensor, OutputTensor};
#[cfg(feature = "backend-opencv")]
pub use backends::DarknetBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use model::{load_labels, load_model, load_model_with, parse_labels, DetectionModel};
pub use network::NetworkConfig;
pub use nms::{non_max_suppression, BoundingBox};
pub use preprocess::{blob_from_frame, PIXEL_SCALE};
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{DetectParams, Detection};
