//! opencam
//!
//! Live camera viewer with on-the-fly object detection.
//!
//! # Architecture
//!
//! A `Session` pulls frames from one camera at a fixed interval, runs them
//! through a YOLO-style detector when a model is available, draws the
//! detections and hands the result to a presentation surface:
//!
//! 1. **Capture**: devices are enumerated by probing indices; a device is held
//!    by at most one handle at a time and released on close or drop.
//! 2. **Detect**: frames are resized into an input tensor, run through an
//!    inference backend and decoded into thresholded, suppressed boxes.
//! 3. **Annotate**: boxes and captions are drawn on a copy of the frame.
//! 4. **Present**: the frame is converted to RGB for the surface.
//!
//! Detection is optional. Until the model is loaded (or if loading fails) the
//! session shows frames unannotated.
//!
//! # Module Structure
//!
//! - `frame`: packed BGR/RGB frame container
//! - `capture`: camera backends, enumeration, exclusive handles
//! - `detect`: network config, backends, decoding and NMS
//! - `annotate`: box and caption overlay
//! - `display`: RGB display images and presentation surfaces
//! - `model_files`: model download and background loading
//! - `session`: the Idle/Streaming state machine and run loop
//! - `config`: JSON + environment configuration

pub mod annotate;
pub mod capture;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod frame;
pub mod model_files;
pub mod session;

pub use annotate::annotate;
pub use capture::{
    CameraBackend, CameraDescriptor, CameraDevice, CaptureHandle, CaptureRequest, CaptureSource,
    SyntheticBackend, SyntheticControl, SyntheticDevice,
};
#[cfg(feature = "ingest-v4l2")]
pub use capture::V4l2Backend;
pub use config::OpencamConfig;
pub use detect::{
    load_model, BackendRegistry, BoundingBox, DetectParams, Detection, DetectionModel,
    InferenceBackend, NetworkConfig, OutputTensor, ScriptedBackend,
};
pub use display::{
    DisplayImage, JpegSnapshotSurface, Notice, NoticeLevel, NullSurface, PresentationSurface,
    RecordingSurface,
};
pub use error::{CameraError, ErrorKind};
pub use frame::{Frame, PixelLayout};
pub use model_files::{
    download_missing, DownloadProgress, LoadEvent, ModelFile, ModelFiles, ModelLoader,
};
pub use session::{
    AnnotationMode, Session, SessionSettings, SessionStats, StreamState, TickOutcome,
};
