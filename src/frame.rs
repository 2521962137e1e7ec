//! Frame container.
//!
//! - `Frame`: a packed 8-bit, 3-channel pixel buffer with dimensions and layout.
//! - `PixelLayout`: channel order tag (cameras produce BGR, displays want RGB).
//!
//! A `Frame` is immutable once produced by a capture source. Its bytes are
//! readable through `pixels()` but there is no mutable accessor; stages that
//! draw on a frame work on a copy and return a new `Frame`.

use anyhow::{anyhow, Result};

/// Channel order of a packed 3-channel frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Bgr24,
    Rgb24,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        3
    }

    /// Order an RGB color triple for this layout.
    pub fn color(self, rgb: [u8; 3]) -> [u8; 3] {
        match self {
            PixelLayout::Rgb24 => rgb,
            PixelLayout::Bgr24 => [rgb[2], rgb[1], rgb[0]],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed pixel buffer. Length must be exactly `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let expected = packed_len(width, height, layout)?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// A frame filled with one RGB color.
    pub fn filled(width: u32, height: u32, layout: PixelLayout, rgb: [u8; 3]) -> Result<Self> {
        let len = packed_len(width, height, layout)?;
        let px = layout.color(rgb);
        let data = px.iter().copied().cycle().take(len).collect();
        Self::new(data, width, height, layout)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn bytes_per_line(&self) -> usize {
        self.width as usize * self.channels()
    }

    /// Pixel at (x, y) in the frame's own channel order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_line() + x as usize * 3;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Copy of this frame with `draw` applied to the copied bytes.
    ///
    /// Dimensions and layout are preserved; only pixel values can change.
    pub(crate) fn redrawn(&self, draw: impl FnOnce(&mut [u8])) -> Frame {
        let mut data = self.data.clone();
        draw(&mut data);
        Frame {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data,
        }
    }

    /// Convert to another channel order. Same-layout conversion is a plain copy.
    pub fn to_layout(&self, layout: PixelLayout) -> Frame {
        if layout == self.layout {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(3) {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Frame {
            width: self.width,
            height: self.height,
            layout,
            data,
        }
    }
}

pub(crate) fn packed_len(width: u32, height: u32, layout: PixelLayout) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(layout.channels()))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
