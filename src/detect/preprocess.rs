use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, ImageBuffer, Rgb};

use super::backend::InputTensor;
use crate::frame::{Frame, PixelLayout};

/// Scale applied to 8-bit samples.
pub const PIXEL_SCALE: f32 = 1.0 / 255.0;

/// Build the network input for `frame`.
///
/// The frame is resized (bicubic) to `width` x `height`, scaled to `[0, 1]`
/// and laid out as NCHW with channels in `channel_order`. A BGR frame fed to
/// an RGB network therefore has its red and blue planes swapped.
pub fn blob_from_frame(
    frame: &Frame,
    width: u32,
    height: u32,
    channel_order: PixelLayout,
) -> Result<InputTensor> {
    if width == 0 || height == 0 {
        return Err(anyhow!("network input size must be non-zero"));
    }

    let source: ImageBuffer<Rgb<u8>, &[u8]> =
        ImageBuffer::from_raw(frame.width(), frame.height(), frame.pixels())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

    let resized;
    let samples: &[u8] = if (frame.width(), frame.height()) == (width, height) {
        frame.pixels()
    } else {
        resized = imageops::resize(&source, width, height, FilterType::CatmullRom);
        resized.as_raw()
    };

    let swap = frame.layout() != channel_order;
    let plane = width as usize * height as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (i, px) in samples.chunks_exact(3).enumerate() {
        for channel in 0..3 {
            let source_channel = if swap { 2 - channel } else { channel };
            data[channel * plane + i] = px[source_channel] as f32 * PIXEL_SCALE;
        }
    }

    InputTensor::new(3, height as usize, width as usize, data)
}
