//! Decoded source image handed to the engine by the decoding layer.
//!
//! The engine never parses image file formats. Callers supply a raw
//! pixel buffer in one of the fixed [`PixelFormat`] layouts; it is
//! normalized to straight-alpha RGBA once and never mutated afterwards.

use std::hash::Hasher;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::types::{BoundingBox, Color, Dimensions, EngineError, GrayImage, Point};

/// Channel layout of a raw pixel buffer (8 bits per channel, row-major,
/// no padding between rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::GrayAlpha8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// Immutable decoded pixel buffer.
#[derive(Debug, Clone)]
pub struct SourceImage {
    rgba: RgbaImage,
    format: PixelFormat,
}

impl SourceImage {
    /// Build a source image from a raw buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImage`] if either dimension is zero,
    /// the buffer is empty, or its length does not equal
    /// `width * height * format.channels()`.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[u8],
    ) -> Result<Self, EngineError> {
        if data.is_empty() {
            return Err(EngineError::InvalidImage("pixel buffer is empty".into()));
        }
        check_dimensions(width, height)?;
        let expected = usize::try_from(u64::from(width) * u64::from(height))
            .ok()
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or_else(|| EngineError::InvalidImage("image is too large".into()))?;
        if data.len() != expected {
            return Err(EngineError::InvalidImage(format!(
                "buffer holds {} bytes, expected {expected} for {width}x{height} {format:?}",
                data.len(),
            )));
        }

        let channels = format.channels();
        let mut rgba = RgbaImage::new(width, height);
        for (pixel, chunk) in rgba.pixels_mut().zip(data.chunks_exact(channels)) {
            *pixel = match format {
                PixelFormat::Gray8 => Rgba([chunk[0], chunk[0], chunk[0], 255]),
                PixelFormat::GrayAlpha8 => Rgba([chunk[0], chunk[0], chunk[0], chunk[1]]),
                PixelFormat::Rgb8 => Rgba([chunk[0], chunk[1], chunk[2], 255]),
                PixelFormat::Rgba8 => Rgba([chunk[0], chunk[1], chunk[2], chunk[3]]),
            };
        }
        Ok(Self { rgba, format })
    }

    /// Wrap an already-decoded RGBA buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImage`] if either dimension is zero.
    pub fn from_rgba(rgba: RgbaImage) -> Result<Self, EngineError> {
        check_dimensions(rgba.width(), rgba.height())?;
        Ok(Self {
            rgba,
            format: PixelFormat::Rgba8,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.rgba.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Layout of the buffer the image was built from.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Channel count of the original layout.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Normalized RGBA pixels.
    #[must_use]
    pub const fn rgba(&self) -> &RgbaImage {
        &self.rgba
    }

    /// Color of a single pixel.
    #[must_use]
    pub fn color_at(&self, x: u32, y: u32) -> Color {
        Color::from(*self.rgba.get_pixel(x, y))
    }

    /// Mean color of the pixels inside `bounds` whose centers satisfy
    /// `inside`, sampling at most about `max_samples` pixels on a
    /// regular grid. `None` when no sampled pixel qualifies.
    pub fn mean_color_where(
        &self,
        bounds: &BoundingBox,
        max_samples: u32,
        inside: impl Fn(Point) -> bool,
    ) -> Option<Color> {
        let clipped = bounds.fit_to_canvas(self.dimensions());
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (x0, y0, x1, y1) = (
            clipped.min_x.floor() as u32,
            clipped.min_y.floor() as u32,
            (clipped.max_x.ceil() as u32).min(self.width()),
            (clipped.max_y.ceil() as u32).min(self.height()),
        );
        let area = f64::from(x1.saturating_sub(x0)) * f64::from(y1.saturating_sub(y0));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let stride = ((area / f64::from(max_samples.max(1))).sqrt().ceil() as usize).max(1);

        let mut count = 0_u64;
        let mut sum = [0_u64; 4];
        for y in (y0..y1).step_by(stride) {
            for x in (x0..x1).step_by(stride) {
                if !inside(Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5)) {
                    continue;
                }
                let c = self.color_at(x, y);
                for (s, v) in sum.iter_mut().zip([c.r, c.g, c.b, c.a]) {
                    *s += u64::from(v);
                }
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        let ch = |i: usize| u8::try_from(sum[i] / count).unwrap_or(u8::MAX);
        Some(Color::rgba(ch(0), ch(1), ch(2), ch(3)))
    }

    /// Luminance after compositing over white (transparent = paper).
    ///
    /// Uses the Rec. 601 weights `0.299 R + 0.587 G + 0.114 B`.
    #[must_use]
    pub fn luma_over_white(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let [r, g, b] = self.color_at(x, y).over_white();
            image::Luma([luma(r, g, b)])
        })
    }

    /// Stable content hash over dimensions, layout, and pixels.
    ///
    /// Two invocations on byte-identical input report the same value,
    /// which lets metrics consumers correlate repeated runs.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SipHasher13::new();
        hasher.write_u32(self.width());
        hasher.write_u32(self.height());
        hasher.write_usize(self.format.channels());
        hasher.write(self.rgba.as_raw());
        hasher.finish()
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidImage(format!(
            "image has zero dimension ({width}x{height})"
        )));
    }
    Ok(())
}

/// Integer Rec. 601 luminance.
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    let v = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
    #[allow(clippy::cast_possible_truncation)]
    let v = v.min(255) as u8;
    v
}
