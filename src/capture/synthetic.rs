//! Synthetic camera backend.
//!
//! Stands in for hardware in tests and demos. Each `SyntheticDevice` renders a
//! moving gradient. A shared `SyntheticControl` lets callers inject read
//! failures and observe how many devices are open, which is how resource
//! release is verified without a real camera.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::{normalize_to_bgr, CameraBackend, CameraDevice, CaptureRequest, PixelFormat};
use crate::frame::{Frame, PixelLayout};

/// Description of one synthetic device.
#[derive(Clone, Debug)]
pub struct SyntheticDevice {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// When true the device adopts the requested resolution on open.
    pub honor_request: bool,
}

impl SyntheticDevice {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            honor_request: false,
        }
    }

    pub fn honoring_request(mut self) -> Self {
        self.honor_request = true;
        self
    }
}

#[derive(Debug, Default)]
struct ControlState {
    fail_next_reads: u32,
    live: HashSet<u32>,
    opens: u64,
    releases: u64,
    frames: u64,
}

/// Shared test hooks for a `SyntheticBackend`.
#[derive(Clone, Debug, Default)]
pub struct SyntheticControl {
    state: Arc<Mutex<ControlState>>,
}

impl SyntheticControl {
    /// Make the next `count` reads on any open device fail.
    pub fn fail_next_reads(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_reads = count;
        }
    }

    /// Devices currently open (probes included).
    pub fn live_devices(&self) -> usize {
        self.read(|state| state.live.len())
    }

    pub fn open_count(&self) -> u64 {
        self.read(|state| state.opens)
    }

    pub fn release_count(&self) -> u64 {
        self.read(|state| state.releases)
    }

    pub fn frames_served(&self) -> u64 {
        self.read(|state| state.frames)
    }

    fn read<T: Default>(&self, f: impl FnOnce(&ControlState) -> T) -> T {
        self.state.lock().map(|state| f(&state)).unwrap_or_default()
    }
}

pub struct SyntheticBackend {
    devices: Vec<SyntheticDevice>,
    control: SyntheticControl,
}

impl SyntheticBackend {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices,
            control: SyntheticControl::default(),
        }
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open_device(
        &mut self,
        index: u32,
        request: Option<&CaptureRequest>,
    ) -> Result<Box<dyn CameraDevice>> {
        let device = self
            .devices
            .iter()
            .find(|device| device.index == index)
            .ok_or_else(|| anyhow!("stub://camera{} does not exist", index))?;

        let (width, height) = match request {
            Some(request) if device.honor_request && device.width > 0 && device.height > 0 => {
                (request.width, request.height)
            }
            _ => (device.width, device.height),
        };

        let mut state = self
            .control
            .state
            .lock()
            .map_err(|_| anyhow!("synthetic control lock poisoned"))?;
        if !state.live.insert(index) {
            return Err(anyhow!("stub://camera{} is busy", index));
        }
        state.opens += 1;

        Ok(Box::new(SyntheticCamera {
            index,
            width,
            height,
            frame_count: 0,
            released: false,
            control: self.control.clone(),
        }))
    }
}

struct SyntheticCamera {
    index: u32,
    width: u32,
    height: u32,
    frame_count: u64,
    released: bool,
    control: SyntheticControl,
}

impl SyntheticCamera {
    /// Horizontal RGB gradient that drifts one column per frame.
    fn render_rgb(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i % w + shift) % w.max(1);
            let y = i / w;
            px[0] = (x * 255 / w.max(1)) as u8;
            px[1] = (y * 255 / h.max(1)) as u8;
            px[2] = (self.index as usize * 40 % 256) as u8;
        }
        pixels
    }
}

impl CameraDevice for SyntheticCamera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.released {
            return Err(anyhow!("stub://camera{} released", self.index));
        }
        {
            let mut state = self
                .control
                .state
                .lock()
                .map_err(|_| anyhow!("synthetic control lock poisoned"))?;
            if state.fail_next_reads > 0 {
                state.fail_next_reads -= 1;
                return Err(anyhow!("stub://camera{} read timed out", self.index));
            }
            state.frames += 1;
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("stub://camera{} has no signal", self.index));
        }

        self.frame_count += 1;
        let rgb = self.render_rgb();
        let bgr = normalize_to_bgr(&rgb, self.width, self.height, PixelFormat::Rgb24)?;
        Frame::new(bgr, self.width, self.height, PixelLayout::Bgr24)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut state) = self.control.state.lock() {
            state.live.remove(&self.index);
            state.releases += 1;
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.release();
    }
}
