//! Camera capture sources.
//!
//! This module provides the capture side of the viewer:
//! - `CameraBackend`: opens devices by index (V4L2, synthetic)
//! - `CaptureSource`: device enumeration and exclusive opening
//! - `CaptureHandle`: an owned, open device that yields `Frame`s
//!
//! Backends (feature-gated where they need system libraries):
//! - Synthetic devices (always available; tests and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A device is held by at most one `CaptureHandle` at a time. Probing during
//! enumeration opens and releases each device before moving to the next one.

mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::error::CameraError;
use crate::frame::Frame;

pub(crate) use normalize::{normalize_to_bgr, PixelFormat};
pub use synthetic::{SyntheticBackend, SyntheticControl, SyntheticDevice};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Backend;

/// Number of device indices probed by `enumerate`.
pub const DEFAULT_PROBE_LIMIT: u32 = 10;

/// Capture parameters applied when a device is opened for streaming.
///
/// Devices may not honor these exactly; the resolution they actually deliver
/// is read back after opening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// A device found by enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl CameraDescriptor {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            label: format!("Camera {} ({}x{})", index, width, height),
        }
    }
}

/// Platform camera access.
pub trait CameraBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Open device `index`.
    ///
    /// `request` is `None` for enumeration probes: the device must be opened
    /// without changing its configuration. Otherwise the backend applies the
    /// request best effort.
    fn open_device(
        &mut self,
        index: u32,
        request: Option<&CaptureRequest>,
    ) -> Result<Box<dyn CameraDevice>>;
}

/// An open camera device.
pub trait CameraDevice: Send {
    /// Resolution the device currently reports. `(0, 0)` when unknown.
    fn resolution(&self) -> (u32, u32);

    /// Blocking read of the next frame.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release underlying resources. Must tolerate repeated calls.
    fn release(&mut self);
}

/// Releases a probed device however the probe exits.
struct ProbeGuard(Box<dyn CameraDevice>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

type HeldDevices = Arc<Mutex<HashMap<u32, (u32, u32)>>>;

/// Enumerates and opens devices from a backend.
pub struct CaptureSource<B: CameraBackend> {
    backend: B,
    request: CaptureRequest,
    probe_limit: u32,
    held: HeldDevices,
}

impl<B: CameraBackend> CaptureSource<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            request: CaptureRequest::default(),
            probe_limit: DEFAULT_PROBE_LIMIT,
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_request(mut self, request: CaptureRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_probe_limit(mut self, probe_limit: u32) -> Self {
        self.probe_limit = probe_limit;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn request(&self) -> CaptureRequest {
        self.request
    }

    /// Probe device indices `0..probe_limit` and list the usable ones.
    ///
    /// A device is listed only if it opens and reports a non-zero resolution.
    /// Devices currently held by a `CaptureHandle` are listed from the handle's
    /// resolution instead of being reopened.
    pub fn enumerate(&mut self) -> Result<Vec<CameraDescriptor>> {
        let held = lock_held(&self.held)?.clone();
        let mut found = Vec::new();

        for index in 0..self.probe_limit {
            if let Some(&(width, height)) = held.get(&index) {
                found.push(CameraDescriptor::new(index, width, height));
                continue;
            }

            let probe = match self.backend.open_device(index, None) {
                Ok(device) => ProbeGuard(device),
                Err(err) => {
                    log::debug!("probe camera {}: {:#}", index, err);
                    continue;
                }
            };

            let (width, height) = probe.0.resolution();
            if width == 0 || height == 0 {
                log::debug!("probe camera {}: reports no resolution", index);
                continue;
            }
            found.push(CameraDescriptor::new(index, width, height));
        }

        if found.is_empty() {
            log::error!("no available cameras detected");
            return Err(CameraError::NoDeviceFound.into());
        }
        log::info!("Detected {} cameras", found.len());
        Ok(found)
    }

    /// Open device `index` for streaming.
    pub fn open(&mut self, index: u32) -> Result<CaptureHandle> {
        if lock_held(&self.held)?.contains_key(&index) {
            return Err(CameraError::device_unavailable(index, "already open").into());
        }

        let mut device = self
            .backend
            .open_device(index, Some(&self.request))
            .map_err(|err| CameraError::device_unavailable(index, format!("{:#}", err)))?;

        let (width, height) = device.resolution();
        if width == 0 || height == 0 {
            device.release();
            return Err(CameraError::device_unavailable(index, "device reports no resolution").into());
        }
        if (width, height) != (self.request.width, self.request.height) {
            log::info!(
                "camera {}: requested {}x{}@{}, device delivers {}x{}",
                index,
                self.request.width,
                self.request.height,
                self.request.fps,
                width,
                height
            );
        }

        lock_held(&self.held)?.insert(index, (width, height));
        log::info!("Started camera {} via {}", index, self.backend.name());

        Ok(CaptureHandle {
            index,
            resolution: (width, height),
            device: Some(device),
            held: self.held.clone(),
        })
    }
}

/// Exclusive handle to an open device. Closing is idempotent and also
/// happens on drop.
pub struct CaptureHandle {
    index: u32,
    resolution: (u32, u32),
    device: Option<Box<dyn CameraDevice>>,
    held: HeldDevices,
}

impl CaptureHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Pull the next frame. Fails with `ReadFailure` instead of returning a stale frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let index = self.index;
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CameraError::read_failure(index, "handle is closed"))?;
        device
            .read_frame()
            .map_err(|err| CameraError::read_failure(index, format!("{:#}", err)).into())
    }

    pub fn close(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        device.release();
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.index);
        }
        log::info!("Camera {} stopped", self.index);
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_held(held: &HeldDevices) -> Result<MutexGuard<'_, HashMap<u32, (u32, u32)>>> {
    held.lock().map_err(|_| anyhow!("device table lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn three_cameras() -> (CaptureSource<SyntheticBackend>, SyntheticControl) {
        let backend = SyntheticBackend::new(vec![
            SyntheticDevice::new(0, 640, 480),
            SyntheticDevice::new(1, 1280, 720),
            SyntheticDevice::new(2, 320, 240),
        ]);
        let control = backend.control();
        (CaptureSource::new(backend), control)
    }

    #[test]
    fn enumerate_lists_only_devices_that_open_with_resolution() -> Result<()> {
        let backend = SyntheticBackend::new(vec![
            SyntheticDevice::new(0, 640, 480),
            SyntheticDevice::new(3, 0, 0),
            SyntheticDevice::new(4, 800, 600),
        ]);
        let control = backend.control();
        let mut source = CaptureSource::new(backend);

        let cameras = source.enumerate()?;
        let indices: Vec<u32> = cameras.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 4]);
        assert_eq!(cameras[1].label, "Camera 4 (800x600)");
        assert_eq!(control.live_devices(), 0, "probes must release devices");
        Ok(())
    }

    #[test]
    fn enumerate_is_repeatable() -> Result<()> {
        let (mut source, _control) = three_cameras();
        assert_eq!(source.enumerate()?, source.enumerate()?);
        Ok(())
    }

    #[test]
    fn enumerate_without_devices_reports_no_device_found() {
        let mut source = CaptureSource::new(SyntheticBackend::new(vec![]));
        let err = source.enumerate().unwrap_err();
        assert_eq!(CameraError::kind_of(&err), Some(ErrorKind::NoDeviceFound));
    }

    #[test]
    fn enumerate_reports_held_devices_without_reopening() -> Result<()> {
        let (mut source, control) = three_cameras();
        let _handle = source.open(1)?;
        let opens_before = control.open_count();

        let cameras = source.enumerate()?;
        assert_eq!(cameras.len(), 3);
        assert_eq!(control.open_count() - opens_before, 2);
        Ok(())
    }

    #[test]
    fn open_missing_device_is_unavailable() {
        let (mut source, _control) = three_cameras();
        let err = source.open(5).err().expect("device 5 does not exist");
        assert_eq!(
            CameraError::kind_of(&err),
            Some(ErrorKind::DeviceUnavailable)
        );
    }

    #[test]
    fn device_can_only_be_held_once() -> Result<()> {
        let (mut source, _control) = three_cameras();
        let mut first = source.open(0)?;
        assert!(source.open(0).is_err());

        first.close();
        let second = source.open(0)?;
        assert!(second.is_open());
        Ok(())
    }

    #[test]
    fn close_twice_is_harmless_and_releases_once() -> Result<()> {
        let (mut source, control) = three_cameras();
        let mut handle = source.open(2)?;
        assert_eq!(control.live_devices(), 1);

        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(control.live_devices(), 0);
        assert_eq!(control.release_count(), 1);

        drop(handle);
        assert_eq!(control.release_count(), 1);
        Ok(())
    }

    #[test]
    fn read_after_close_is_read_failure() -> Result<()> {
        let (mut source, _control) = three_cameras();
        let mut handle = source.open(0)?;
        handle.close();
        let err = handle.read_frame().unwrap_err();
        assert_eq!(CameraError::kind_of(&err), Some(ErrorKind::ReadFailure));
        Ok(())
    }

    #[test]
    fn read_frame_matches_device_resolution() -> Result<()> {
        let (mut source, _control) = three_cameras();
        let mut handle = source.open(1)?;
        let frame = handle.read_frame()?;
        assert_eq!((frame.width(), frame.height()), handle.resolution());
        Ok(())
    }
}
