//! Decoded frame rasters.
//!
//! - `Frame`: packed RGB24 raster produced by a video decoder or by cropping.
//! - `FrameSample`: a frame tagged with its position in the decode order.
//! - `CropRect`: integer pixel bounds, already clamped to a frame.
//!
//! Frames are transient. The pipeline drops each one as soon as inference on
//! it has finished.

use anyhow::{anyhow, Result};

const RGB_CHANNELS: usize = 3;

/// Packed RGB24 raster. Row-major, no padding between rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap decoded pixels. The buffer must hold exactly `width * height * 3` bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// All-black frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * RGB_CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Copy out the region covered by `rect`.
    ///
    /// Returns `None` when the region has zero area.
    pub fn crop(&self, rect: CropRect) -> Option<Frame> {
        let rect = rect.clamp_to(self.width, self.height);
        if rect.is_empty() {
            return None;
        }

        let row_bytes = self.width as usize * RGB_CHANNELS;
        let crop_row_bytes = rect.width() as usize * RGB_CHANNELS;
        let mut pixels = Vec::with_capacity(crop_row_bytes * rect.height() as usize);
        for y in rect.y1..rect.y2 {
            let start = y as usize * row_bytes + rect.x1 as usize * RGB_CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..start + crop_row_bytes]);
        }

        Some(Frame {
            width: rect.width(),
            height: rect.height(),
            pixels,
        })
    }
}

/// A decoded frame and its zero-based index in decode order.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub index: u64,
    pub frame: Frame,
}

/// Pixel bounds `[x1, x2) x [y1, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRect {
    /// Convert floating box corners into pixel bounds inside a `width x height` frame.
    ///
    /// Coordinates are truncated toward zero, then clamped. Inverted or
    /// out-of-frame boxes collapse to an empty rect.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        Self {
            x1: clamp_coord(x1, width),
            y1: clamp_coord(y1, height),
            x2: clamp_coord(x2, width),
            y2: clamp_coord(y2, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }
}

fn clamp_coord(value: f32, limit: u32) -> u32 {
    // `as` saturates and maps NaN to 0.
    let truncated = value.trunc() as i64;
    truncated.clamp(0, limit as i64) as u32
}
