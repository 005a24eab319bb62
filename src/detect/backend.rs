use anyhow::Result;

use crate::detect::result::{DetectionBox, TextLine};
use crate::frame::{Frame, FrameSample};

/// Plate detection engine.
///
/// Implementations hold loaded model state. They are constructed once at
/// process start and reused for every job.
pub trait PlateDetector {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Locate candidate plates in a sampled frame.
    ///
    /// Only boxes with `confidence >= confidence_threshold` are returned.
    fn detect(
        &mut self,
        sample: &FrameSample,
        confidence_threshold: f32,
    ) -> Result<Vec<DetectionBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Text recognition engine.
pub trait TextRecognizer {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Read text lines out of a cropped region, best line first.
    ///
    /// An empty list is a valid answer for low-information crops.
    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextLine>>;
}

impl<T: PlateDetector + ?Sized> PlateDetector for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(
        &mut self,
        sample: &FrameSample,
        confidence_threshold: f32,
    ) -> Result<Vec<DetectionBox>> {
        (**self).detect(sample, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextLine>> {
        (**self).recognize(crop)
    }
}
