//! Presentation surface.
//!
//! Frames leave the pipeline as RGB `DisplayImage`s and are handed to a
//! `PresentationSurface`. The surface also receives user-visible notices
//! (open failures, lost streams, missing model).

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, RgbImage};

use crate::frame::{Frame, PixelLayout};

/// RGB888 image ready for a display surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: usize,
    pub rgb: Vec<u8>,
}

impl DisplayImage {
    pub fn from_frame(frame: &Frame) -> Self {
        let rgb = frame.to_layout(PixelLayout::Rgb24);
        Self {
            width: rgb.width(),
            height: rgb.height(),
            bytes_per_line: rgb.bytes_per_line(),
            rgb: rgb.into_pixels(),
        }
    }

    /// Largest aspect-preserving scale of this image that fits in `max_w` x `max_h`.
    pub fn fit_within(&self, max_w: u32, max_h: u32) -> Result<DisplayImage> {
        if max_w == 0 || max_h == 0 {
            return Err(anyhow!("surface size must be non-zero, got {}x{}", max_w, max_h));
        }
        if self.width == 0 || self.height == 0 {
            return Ok(self.clone());
        }
        let scale = f64::min(
            max_w as f64 / self.width as f64,
            max_h as f64 / self.height as f64,
        );
        let width = ((self.width as f64 * scale).round() as u32).clamp(1, max_w);
        let height = ((self.height as f64 * scale).round() as u32).clamp(1, max_h);
        if (width, height) == (self.width, self.height) {
            return Ok(self.clone());
        }
        let source = RgbImage::from_raw(self.width, self.height, self.rgb.clone())
            .ok_or_else(|| anyhow!("display buffer does not match {}x{}", self.width, self.height))?;
        let scaled = imageops::resize(&source, width, height, imageops::FilterType::Triangle);
        Ok(DisplayImage {
            width,
            height,
            bytes_per_line: width as usize * 3,
            rgb: scaled.into_raw(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A message meant for the person watching the feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

pub trait PresentationSurface {
    fn present(&mut self, image: &DisplayImage) -> Result<()>;
    /// Blank the surface. Called when streaming stops.
    fn clear(&mut self) -> Result<()>;
    fn notify(&mut self, notice: Notice);
}

/// Discards everything. Notices still reach the log.
#[derive(Debug, Default)]
pub struct NullSurface;

impl PresentationSurface for NullSurface {
    fn present(&mut self, _image: &DisplayImage) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    fn notify(&mut self, notice: Notice) {
        log::debug!("notice ({:?}): {}", notice.level, notice.message);
    }
}

/// Keeps what it was shown, for inspection.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub last: Option<DisplayImage>,
    pub presented: u64,
    pub clears: u64,
    pub notices: Vec<Notice>,
}

impl PresentationSurface for RecordingSurface {
    fn present(&mut self, image: &DisplayImage) -> Result<()> {
        self.last = Some(image.clone());
        self.presented += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.last = None;
        self.clears += 1;
        Ok(())
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

/// Writes the latest frame to a JPEG file every `every` presents.
///
/// The file is replaced atomically (write then rename) so a viewer polling
/// it never sees a partial image. `clear` removes it.
pub struct JpegSnapshotSurface {
    path: PathBuf,
    every: u64,
    quality: u8,
    max_size: Option<(u32, u32)>,
    presented: u64,
}

impl JpegSnapshotSurface {
    pub fn new<P: AsRef<Path>>(path: P, every: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            every: every.max(1),
            quality: 85,
            max_size: None,
            presented: 0,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Scale snapshots down to fit `width` x `height`, keeping aspect ratio.
    pub fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, image: &DisplayImage) -> Result<()> {
        let scaled;
        let image = match self.max_size {
            Some((w, h)) if image.width > w || image.height > h => {
                scaled = image.fit_within(w, h)?;
                &scaled
            }
            _ => image,
        };
        let tmp = self.path.with_extension("jpg.tmp");
        let file = fs::File::create(&tmp)
            .with_context(|| format!("create snapshot {}", tmp.display()))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), self.quality);
        encoder
            .encode(&image.rgb, image.width, image.height, ExtendedColorType::Rgb8)
            .context("encode snapshot")?;
        drop(encoder);
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}

impl PresentationSurface for JpegSnapshotSurface {
    fn present(&mut self, image: &DisplayImage) -> Result<()> {
        self.presented += 1;
        if (self.presented - 1) % self.every != 0 {
            return Ok(());
        }
        self.write(image)
    }

    fn clear(&mut self) -> Result<()> {
        self.presented = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove snapshot {}", self.path.display()))
            }
        }
    }

    fn notify(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Warning => log::warn!("{}", notice.message),
            NoticeLevel::Error => log::error!("{}", notice.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_frame_converts_bgr_to_rgb() -> Result<()> {
        let frame = Frame::filled(4, 2, PixelLayout::Bgr24, [200, 100, 50])?;
        let image = DisplayImage::from_frame(&frame);
        assert_eq!((image.width, image.height, image.bytes_per_line), (4, 2, 12));
        assert_eq!(&image.rgb[..3], &[200, 100, 50]);
        assert_eq!(image.rgb.len(), 24);
        Ok(())
    }

    #[test]
    fn fit_within_keeps_aspect_ratio() -> Result<()> {
        let frame = Frame::filled(640, 480, PixelLayout::Bgr24, [0, 0, 0])?;
        let image = DisplayImage::from_frame(&frame);

        let wide = image.fit_within(800, 300)?;
        assert_eq!((wide.width, wide.height), (400, 300));
        let tall = image.fit_within(320, 1000)?;
        assert_eq!((tall.width, tall.height), (320, 240));
        assert_eq!(tall.rgb.len(), 320 * 240 * 3);
        Ok(())
    }

    #[test]
    fn fit_within_rejects_empty_surface() -> Result<()> {
        let frame = Frame::filled(8, 8, PixelLayout::Rgb24, [0, 0, 0])?;
        assert!(DisplayImage::from_frame(&frame).fit_within(0, 10).is_err());
        Ok(())
    }

    #[test]
    fn jpeg_surface_writes_and_clears() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("live.jpg");
        let mut surface = JpegSnapshotSurface::new(&path, 2);
        let frame = Frame::filled(32, 24, PixelLayout::Bgr24, [10, 200, 10])?;
        let image = DisplayImage::from_frame(&frame);

        surface.present(&image)?;
        assert!(path.exists());
        let written = fs::metadata(&path)?.len();
        assert!(written > 0);

        surface.clear()?;
        assert!(!path.exists());
        surface.clear()?;
        Ok(())
    }

    #[test]
    fn recording_surface_tracks_state() -> Result<()> {
        let mut surface = RecordingSurface::default();
        let frame = Frame::filled(2, 2, PixelLayout::Bgr24, [1, 1, 1])?;
        surface.present(&DisplayImage::from_frame(&frame))?;
        surface.notify(Notice::warning("careful"));
        surface.clear()?;
        assert_eq!(surface.presented, 1);
        assert_eq!(surface.clears, 1);
        assert!(surface.last.is_none());
        assert_eq!(surface.notices, vec![Notice::warning("careful")]);
        Ok(())
    }
}
