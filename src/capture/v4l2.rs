//! V4L2 camera backend.
//!
//! Device index `i` maps to `/dev/video{i}`. Opening for streaming requests
//! packed BGR at the configured size and frame rate; if the driver refuses,
//! the device's current format is used and normalized to BGR per frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{normalize_to_bgr, CameraBackend, CameraDevice, CaptureRequest, PixelFormat};
use crate::frame::{Frame, PixelLayout};

const STREAM_BUFFERS: u32 = 4;

/// V4L2 backend for local USB/UVC cameras.
#[derive(Clone, Debug)]
pub struct V4l2Backend {
    device_prefix: String,
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self {
            device_prefix: "/dev/video".to_string(),
        }
    }

    fn path_for(&self, index: u32) -> String {
        format!("{}{}", self.device_prefix, index)
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open_device(
        &mut self,
        index: u32,
        request: Option<&CaptureRequest>,
    ) -> Result<Box<dyn CameraDevice>> {
        use v4l::video::Capture;

        let path = self.path_for(index);
        let device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;

        let Some(request) = request else {
            let format = device.format().context("read v4l2 format")?;
            return Ok(Box::new(V4l2Camera {
                path,
                width: format.width,
                height: format.height,
                pixel_format: PixelFormat::from_fourcc(&format.fourcc.repr),
                state: None,
            }));
        };

        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Backend: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if request.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Backend: failed to set fps on {}: {}", path, err);
            }
        }

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr);
        if pixel_format.is_none() {
            return Err(anyhow!(
                "{} delivers unsupported pixel format {}",
                path,
                format.fourcc
            ));
        }

        let state = V4l2StreamState::try_new(device, |device| {
            v4l::prelude::MmapStream::with_buffers(
                device,
                v4l::buffer::Type::VideoCapture,
                STREAM_BUFFERS,
            )
            .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
        })?;

        log::info!(
            "V4l2Backend: streaming {} ({}x{}, {})",
            path,
            format.width,
            format.height,
            format.fourcc
        );

        Ok(Box::new(V4l2Camera {
            path,
            width: format.width,
            height: format.height,
            pixel_format,
            state: Some(state),
        }))
    }
}

#[self_referencing]
struct V4l2StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Camera {
    path: String,
    width: u32,
    height: u32,
    pixel_format: Option<PixelFormat>,
    state: Option<V4l2StreamState>,
}

impl CameraDevice for V4l2Camera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let format = self
            .pixel_format
            .ok_or_else(|| anyhow!("{} has no supported pixel format", self.path))?;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("{} is not streaming", self.path))?;

        let raw = state
            .with_mut(|fields| -> std::io::Result<Vec<u8>> {
                let (buf, meta) = fields.stream.next()?;
                let used = meta.bytesused as usize;
                let end = if used == 0 || used > buf.len() {
                    buf.len()
                } else {
                    used
                };
                Ok(buf[..end].to_vec())
            })
            .with_context(|| format!("capture v4l2 frame from {}", self.path))?;

        let bgr = normalize_to_bgr(&raw, self.width, self.height, format)?;
        Frame::new(bgr, self.width, self.height, PixelLayout::Bgr24)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("V4l2Backend: released {}", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_maps_to_device_node() {
        let backend = V4l2Backend::new();
        assert_eq!(backend.path_for(0), "/dev/video0");
        assert_eq!(backend.path_for(7), "/dev/video7");
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut backend = V4l2Backend {
            device_prefix: "/nonexistent/video".to_string(),
        };
        assert!(backend.open_device(0, None).is_err());
    }
}
