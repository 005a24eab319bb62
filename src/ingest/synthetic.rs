use anyhow::{anyhow, Result};
use std::path::Path;

use super::{FrameStream, VideoDecoder, VideoInfo};
use crate::frame::Frame;

/// Decoder that ignores file contents and produces generated frames.
///
/// Each opened stream yields `frame_count` frames of a shifting gradient,
/// optionally followed by a decode error.
#[derive(Clone, Debug)]
pub struct SyntheticDecoder {
    frame_count: u64,
    width: u32,
    height: u32,
    fps: f64,
    fail_after: bool,
}

impl SyntheticDecoder {
    pub fn new(frame_count: u64, width: u32, height: u32) -> Self {
        Self {
            frame_count,
            width,
            height,
            fps: 25.0,
            fail_after: false,
        }
    }

    /// End every stream with a decode error instead of a clean end of file.
    pub fn with_trailing_error(mut self) -> Self {
        self.fail_after = true;
        self
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameStream>> {
        log::info!("SyntheticDecoder: opened {} (synthetic)", path.display());
        Ok(Box::new(SyntheticStream {
            config: self.clone(),
            produced: 0,
            done: false,
        }))
    }
}

struct SyntheticStream {
    config: SyntheticDecoder,
    produced: u64,
    done: bool,
}

impl SyntheticStream {
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.produced) % 256) as u8;
        }
        pixels
    }
}

impl Iterator for SyntheticStream {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.produced >= self.config.frame_count {
            self.done = true;
            if self.config.fail_after {
                return Some(Err(anyhow!("synthetic decode failure")));
            }
            return None;
        }

        let frame = Frame::new(self.config.width, self.config.height, self.generate_pixels());
        self.produced += 1;
        if frame.is_err() {
            self.done = true;
        }
        Some(frame)
    }
}

impl FrameStream for SyntheticStream {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        }
    }
}
