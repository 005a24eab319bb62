//! Video decoding.
//!
//! A `VideoDecoder` opens a file and yields its frames as a lazy, single-pass
//! `FrameStream`. Restarting a scan means opening the file again. Backends:
//! - FFmpeg (feature: decode-ffmpeg)
//! - Synthetic frames (tests and dry runs)
//!
//! Decoder state lives in the stream and is released when the stream drops.

#[cfg(feature = "decode-ffmpeg")]
mod file_ffmpeg;
mod synthetic;

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;

#[cfg(feature = "decode-ffmpeg")]
pub use file_ffmpeg::FfmpegDecoder;
pub use synthetic::SyntheticDecoder;

/// Basic properties of an opened video.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate, 0.0 when unknown.
    pub fps: f64,
}

/// Sequential frame source over one opened video.
///
/// Yields frames in decode order. An `Err` item reports a decode failure;
/// nothing follows it.
pub trait FrameStream: Iterator<Item = Result<Frame>> {
    fn info(&self) -> VideoInfo;
}

/// Opens video files for decoding.
pub trait VideoDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameStream>>;
}

impl<T: VideoDecoder + ?Sized> VideoDecoder for Box<T> {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameStream>> {
        (**self).open(path)
    }
}
