//! Error taxonomy shared by capture, detection and the session loop.
//!
//! Every fallible operation returns `anyhow::Result`. The kinds below are
//! attached as the root error so the session loop can decide centrally
//! whether to log, surface to the user, or escalate.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraError {
    /// Enumeration found no usable device.
    NoDeviceFound,
    /// A device could not be opened (missing, busy, already held).
    DeviceUnavailable { index: u32, reason: String },
    /// A single frame could not be read. Transient.
    ReadFailure { index: u32, reason: String },
    /// The detection model could not be built. Fatal to detection only.
    ModelLoad(String),
    /// A model file could not be fetched.
    Download { file: String, reason: String },
    /// Consecutive read failures exceeded the retry bound; the stream was stopped.
    StreamLost {
        index: u32,
        failures: u32,
        last: String,
    },
}

/// Coarse classification of a `CameraError`, for policy decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NoDeviceFound,
    DeviceUnavailable,
    ReadFailure,
    ModelLoad,
    Download,
    StreamLost,
}

impl CameraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NoDeviceFound => ErrorKind::NoDeviceFound,
            CameraError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            CameraError::ReadFailure { .. } => ErrorKind::ReadFailure,
            CameraError::ModelLoad(_) => ErrorKind::ModelLoad,
            CameraError::Download { .. } => ErrorKind::Download,
            CameraError::StreamLost { .. } => ErrorKind::StreamLost,
        }
    }

    /// Classify an `anyhow::Error` by looking for a `CameraError` in its chain.
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<CameraError>())
            .map(CameraError::kind)
    }

    pub fn device_unavailable(index: u32, reason: impl fmt::Display) -> Self {
        CameraError::DeviceUnavailable {
            index,
            reason: reason.to_string(),
        }
    }

    pub fn read_failure(index: u32, reason: impl fmt::Display) -> Self {
        CameraError::ReadFailure {
            index,
            reason: reason.to_string(),
        }
    }

    pub fn model_load(reason: impl fmt::Display) -> Self {
        CameraError::ModelLoad(reason.to_string())
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NoDeviceFound => write!(f, "no cameras detected"),
            CameraError::DeviceUnavailable { index, reason } => {
                write!(f, "cannot open camera {}: {}", index, reason)
            }
            CameraError::ReadFailure { index, reason } => {
                write!(f, "failed to get frame from camera {}: {}", index, reason)
            }
            CameraError::ModelLoad(reason) => {
                write!(f, "failed to load object detection model: {}", reason)
            }
            CameraError::Download { file, reason } => {
                write!(f, "failed to download {}: {}", file, reason)
            }
            CameraError::StreamLost {
                index,
                failures,
                last,
            } => write!(
                f,
                "camera {} stopped after {} consecutive read failures (last: {})",
                index, failures, last
            ),
        }
    }
}

impl std::error::Error for CameraError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_of_finds_root_cause_through_context() {
        let err: anyhow::Result<()> =
            Err(CameraError::device_unavailable(5, "no such device").into());
        let err = err.context("start camera").unwrap_err();
        assert_eq!(
            CameraError::kind_of(&err),
            Some(ErrorKind::DeviceUnavailable)
        );
    }

    #[test]
    fn kind_of_ignores_foreign_errors() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(CameraError::kind_of(&err), None);
    }

    #[test]
    fn stream_lost_message_names_device_and_count() {
        let err = CameraError::StreamLost {
            index: 2,
            failures: 3,
            last: "timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "camera 2 stopped after 3 consecutive read failures (last: timeout)"
        );
    }
}
