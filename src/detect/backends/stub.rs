use anyhow::Result;
use std::collections::{HashMap, VecDeque};

use crate::detect::backend::{PlateDetector, TextRecognizer};
use crate::detect::result::{DetectionBox, TextLine};
use crate::frame::{Frame, FrameSample};

/// Scripted detector for tests and dry runs.
///
/// Returns the boxes registered for a frame index, filtered by the requested
/// threshold, and records every index it was asked about.
#[derive(Debug, Default)]
pub struct StubDetector {
    boxes: HashMap<u64, Vec<DetectionBox>>,
    inspected: Vec<u64>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the raw detector output for one frame index.
    pub fn with_boxes(mut self, frame_index: u64, boxes: Vec<DetectionBox>) -> Self {
        self.boxes.insert(frame_index, boxes);
        self
    }

    /// Frame indices passed to `detect`, in call order.
    pub fn inspected_frames(&self) -> &[u64] {
        &self.inspected
    }
}

impl PlateDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        sample: &FrameSample,
        confidence_threshold: f32,
    ) -> Result<Vec<DetectionBox>> {
        self.inspected.push(sample.index);
        Ok(self
            .boxes
            .get(&sample.index)
            .map(|boxes| {
                boxes
                    .iter()
                    .filter(|b| b.confidence >= confidence_threshold)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Scripted recognizer for tests and dry runs.
///
/// Queued responses are returned in order; once the queue is empty every
/// call gets the fallback response (empty unless set).
#[derive(Debug, Default)]
pub struct StubRecognizer {
    responses: VecDeque<Vec<TextLine>>,
    fallback: Vec<TextLine>,
    crops: Vec<(u32, u32)>,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recognizer that answers every call with `lines`.
    pub fn always(lines: Vec<TextLine>) -> Self {
        Self {
            fallback: lines,
            ..Self::default()
        }
    }

    /// Queue a response for the next unanswered call.
    pub fn with_response(mut self, lines: Vec<TextLine>) -> Self {
        self.responses.push_back(lines);
        self
    }

    /// Dimensions of every crop received, in call order.
    pub fn crops(&self) -> &[(u32, u32)] {
        &self.crops
    }
}

impl TextRecognizer for StubRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextLine>> {
        self.crops.push((crop.width(), crop.height()));
        Ok(self
            .responses
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
