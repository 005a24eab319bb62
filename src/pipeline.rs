//! Frame pipeline: sampled detection, per-box recognition, plate readings.
//!
//! `FramePipeline` is a lazy iterator over `PlateReading`s. It pulls frames
//! from a decoder only as readings are requested, so a consumer that stops
//! early stops decoding too.
//!
//! Per decoded frame:
//! 1. Frames whose index is not a multiple of the stride are skipped.
//! 2. Sampled frames go to the detector with the detection threshold.
//! 3. Each box at or above the threshold is cropped and recognized.
//! 4. Only the first text line is consulted; at or above the recognition
//!    threshold its normalized text becomes a reading.
//!
//! Inference errors and decode errors are logged, never raised. A decode
//! error ends the stream.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::{DetectionBox, PlateDetector, TextRecognizer};
use crate::frame::{Frame, FrameSample};
use crate::job::{JobId, PlateReading};

pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;
pub const DEFAULT_RECOGNITION_THRESHOLD: f32 = 0.6;
pub const DEFAULT_FRAME_STRIDE: u32 = 3;

/// Fixed thresholds and sampling for a scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub detection_threshold: f32,
    pub recognition_threshold: f32,
    /// Every `frame_stride`-th frame is inspected, starting at index 0.
    pub frame_stride: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            recognition_threshold: DEFAULT_RECOGNITION_THRESHOLD,
            frame_stride: DEFAULT_FRAME_STRIDE,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("detection threshold", self.detection_threshold),
            ("recognition threshold", self.recognition_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.frame_stride == 0 {
            return Err(anyhow!("frame stride must be greater than zero"));
        }
        Ok(())
    }

    pub fn is_sampled(&self, frame_index: u64) -> bool {
        frame_index % u64::from(self.frame_stride.max(1)) == 0
    }
}

/// Counters for one scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_decoded: u64,
    pub frames_sampled: u64,
    pub boxes_detected: u64,
    pub recognitions: u64,
    pub readings: u64,
    pub decode_failed: bool,
}

/// Upper-case and keep only alphanumeric characters.
///
/// Idempotent: `normalize_plate(normalize_plate(s)) == normalize_plate(s)`.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Lazy plate scan over one frame stream.
pub struct FramePipeline<'a, I, D: ?Sized, R: ?Sized> {
    job_id: JobId,
    frames: Option<I>,
    detector: &'a mut D,
    recognizer: &'a mut R,
    settings: PipelineSettings,
    next_index: u64,
    pending: VecDeque<PlateReading>,
    stats: PipelineStats,
}

impl<'a, I, D, R> FramePipeline<'a, I, D, R>
where
    I: Iterator<Item = Result<Frame>>,
    D: PlateDetector + ?Sized,
    R: TextRecognizer + ?Sized,
{
    pub fn new(
        job_id: JobId,
        frames: I,
        detector: &'a mut D,
        recognizer: &'a mut R,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            job_id,
            frames: Some(frames),
            detector,
            recognizer,
            settings,
            next_index: 0,
            pending: VecDeque::new(),
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Drop the frame source, releasing decoder resources.
    fn finish(&mut self) {
        self.frames = None;
    }

    fn inspect(&mut self, sample: &FrameSample) {
        self.stats.frames_sampled += 1;
        let threshold = self.settings.detection_threshold;
        let boxes = match self.detector.detect(sample, threshold) {
            Ok(boxes) => boxes,
            Err(e) => {
                log::warn!(
                    "job {}: detection failed at frame {}: {:#}",
                    self.job_id,
                    sample.index,
                    e
                );
                return;
            }
        };
        let boxes: Vec<DetectionBox> = boxes
            .into_iter()
            .filter(|b| b.confidence >= threshold)
            .collect();
        if boxes.is_empty() {
            return;
        }

        log::info!(
            "job {}: detection found at frame {} ({} boxes)",
            self.job_id,
            sample.index,
            boxes.len()
        );
        for detection in boxes {
            self.stats.boxes_detected += 1;
            if let Some(reading) = self.read_box(sample, &detection) {
                self.pending.push_back(reading);
            }
        }
    }

    fn read_box(&mut self, sample: &FrameSample, detection: &DetectionBox) -> Option<PlateReading> {
        let frame = &sample.frame;
        let Some(crop) = frame.crop(detection.crop_rect(frame.width(), frame.height())) else {
            log::debug!(
                "job {}: empty crop at frame {} for {:?}",
                self.job_id,
                sample.index,
                detection
            );
            return None;
        };

        self.stats.recognitions += 1;
        let lines = match self.recognizer.recognize(&crop) {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!(
                    "job {}: recognition failed at frame {}: {:#}",
                    self.job_id,
                    sample.index,
                    e
                );
                return None;
            }
        };
        log::debug!("job {}: recognition raw: {:?}", self.job_id, lines);

        let first = lines.first()?;
        if first.confidence < self.settings.recognition_threshold {
            return None;
        }
        let plate_text = normalize_plate(&first.text);

        log::info!(
            "job {}: plate detected: {} (conf={:.2})",
            self.job_id,
            plate_text,
            first.confidence
        );
        Some(PlateReading {
            job_id: self.job_id.clone(),
            plate_text,
            confidence: first.confidence,
        })
    }
}

impl<'a, I, D, R> Iterator for FramePipeline<'a, I, D, R>
where
    I: Iterator<Item = Result<Frame>>,
    D: PlateDetector + ?Sized,
    R: TextRecognizer + ?Sized,
{
    type Item = PlateReading;

    fn next(&mut self) -> Option<PlateReading> {
        loop {
            if let Some(reading) = self.pending.pop_front() {
                self.stats.readings += 1;
                return Some(reading);
            }

            let next = self.frames.as_mut()?.next();
            match next {
                None => {
                    log::debug!(
                        "job {}: end of stream after {} frames",
                        self.job_id,
                        self.stats.frames_decoded
                    );
                    self.finish();
                }
                Some(Err(e)) => {
                    log::warn!(
                        "job {}: decode failed after {} frames: {:#}",
                        self.job_id,
                        self.stats.frames_decoded,
                        e
                    );
                    self.stats.decode_failed = true;
                    self.finish();
                }
                Some(Ok(frame)) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    self.stats.frames_decoded += 1;
                    if self.settings.is_sampled(index) {
                        self.inspect(&FrameSample { index, frame });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{StubDetector, StubRecognizer, TextLine};

    fn frames(count: usize) -> impl Iterator<Item = Result<Frame>> {
        (0..count).map(|_| Ok(Frame::blank(64, 32)))
    }

    fn job() -> JobId {
        JobId::new("job-7").unwrap()
    }

    fn plate_box(confidence: f32) -> DetectionBox {
        DetectionBox::new(4.0, 4.0, 36.0, 20.0, confidence)
    }

    fn settings(stride: u32) -> PipelineSettings {
        PipelineSettings {
            frame_stride: stride,
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn normalization_uppercases_and_strips() {
        assert_eq!(normalize_plate("ab-12 CD!"), "AB12CD");
        assert_eq!(normalize_plate(""), "");
        for text in ["ab-12 CD!", "  x y z ", "mh 12 ab 1234", "AB12CD"] {
            let once = normalize_plate(text);
            assert_eq!(normalize_plate(&once), once);
        }
    }

    #[test]
    fn only_stride_multiples_reach_the_detector() {
        for stride in [1u32, 2, 3, 5, 7] {
            let mut detector = StubDetector::new();
            let mut recognizer = StubRecognizer::new();
            let mut pipeline = FramePipeline::new(
                job(),
                frames(20),
                &mut detector,
                &mut recognizer,
                settings(stride),
            );
            assert_eq!(pipeline.by_ref().count(), 0);
            let stats = pipeline.stats();
            drop(pipeline);

            let expected: Vec<u64> = (0..20).filter(|i| i % stride as u64 == 0).collect();
            assert_eq!(detector.inspected_frames(), expected.as_slice());
            assert_eq!(stats.frames_decoded, 20);
            assert_eq!(stats.frames_sampled, expected.len() as u64);
        }
    }

    #[test]
    fn low_confidence_boxes_are_never_recognized() {
        // The stub already filters; the pipeline must hold the line even if
        // a backend does not.
        struct LeakyDetector;
        impl PlateDetector for LeakyDetector {
            fn name(&self) -> &'static str {
                "leaky"
            }
            fn detect(&mut self, _: &FrameSample, _: f32) -> Result<Vec<DetectionBox>> {
                Ok(vec![plate_box(0.49), plate_box(0.1)])
            }
        }

        let mut detector = LeakyDetector;
        let mut recognizer = StubRecognizer::always(vec![TextLine::new("AB12", 0.99)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(3),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        assert!(readings.is_empty());
        assert!(recognizer.crops().is_empty());
    }

    #[test]
    fn low_confidence_text_is_not_reported() {
        let mut detector = StubDetector::new().with_boxes(0, vec![plate_box(0.9)]);
        let mut recognizer = StubRecognizer::new().with_response(vec![TextLine::new("AB12", 0.59)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        assert!(readings.is_empty());
        assert_eq!(recognizer.crops(), &[(32, 16)]);
    }

    #[test]
    fn threshold_boundaries_are_inclusive() {
        let mut detector = StubDetector::new().with_boxes(0, vec![plate_box(0.5)]);
        let mut recognizer = StubRecognizer::new().with_response(vec![TextLine::new("x1", 0.6)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].plate_text, "X1");
    }

    #[test]
    fn consecutive_sampled_frames_emit_in_order() {
        let mut detector = StubDetector::new()
            .with_boxes(0, vec![plate_box(0.8)])
            .with_boxes(3, vec![plate_box(0.8)]);
        let mut recognizer = StubRecognizer::new()
            .with_response(vec![TextLine::new("first 1", 0.9)])
            .with_response(vec![TextLine::new("second 2", 0.9)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(6),
            &mut detector,
            &mut recognizer,
            settings(3),
        )
        .collect();

        let plates: Vec<&str> = readings.iter().map(|r| r.plate_text.as_str()).collect();
        assert_eq!(plates, vec!["FIRST1", "SECOND2"]);
        assert!(readings.iter().all(|r| r.job_id.as_str() == "job-7"));
    }

    #[test]
    fn each_box_is_read_independently() {
        let mut detector = StubDetector::new().with_boxes(
            0,
            vec![plate_box(0.9), plate_box(0.7), plate_box(0.95)],
        );
        let mut recognizer = StubRecognizer::new()
            .with_response(vec![TextLine::new("AAA", 0.9)])
            .with_response(Vec::new())
            .with_response(vec![TextLine::new("CCC", 0.8)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        let plates: Vec<&str> = readings.iter().map(|r| r.plate_text.as_str()).collect();
        assert_eq!(plates, vec!["AAA", "CCC"]);
        assert_eq!(recognizer.crops().len(), 3);
    }

    #[test]
    fn only_the_first_text_line_counts() {
        let mut detector = StubDetector::new().with_boxes(0, vec![plate_box(0.9)]);
        let mut recognizer = StubRecognizer::new().with_response(vec![
            TextLine::new("weak", 0.3),
            TextLine::new("STRONG", 0.99),
        ]);
        let count = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .count();

        assert_eq!(count, 0);
    }

    #[test]
    fn zero_area_and_off_frame_boxes_are_skipped() {
        let mut detector = StubDetector::new().with_boxes(
            0,
            vec![
                DetectionBox::new(10.0, 10.0, 10.5, 30.0, 0.9),
                DetectionBox::new(200.0, 200.0, 300.0, 300.0, 0.9),
                plate_box(0.9),
            ],
        );
        let mut recognizer = StubRecognizer::always(vec![TextLine::new("AB12", 0.95)]);
        let count = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .count();

        assert_eq!(count, 1);
        assert_eq!(recognizer.crops(), &[(32, 16)]);
    }

    #[test]
    fn confident_text_without_alphanumerics_is_reported_empty() {
        let mut detector = StubDetector::new().with_boxes(0, vec![plate_box(0.9)]);
        let mut recognizer = StubRecognizer::always(vec![TextLine::new(" -- ", 0.95)]);
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(1),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].plate_text, "");
        assert_eq!(readings[0].confidence, 0.95);
    }

    #[test]
    fn decode_error_ends_the_scan() {
        let source = vec![
            Ok(Frame::blank(64, 32)),
            Err(anyhow!("corrupt packet")),
            Ok(Frame::blank(64, 32)),
        ];
        let mut detector = StubDetector::new();
        let mut recognizer = StubRecognizer::new();
        let mut pipeline = FramePipeline::new(
            job(),
            source.into_iter(),
            &mut detector,
            &mut recognizer,
            settings(1),
        );

        assert!(pipeline.next().is_none());
        assert!(pipeline.next().is_none());
        let stats = pipeline.stats();
        assert_eq!(stats.frames_decoded, 1);
        assert!(stats.decode_failed);
    }

    #[test]
    fn inference_errors_are_not_fatal() {
        struct FlakyRecognizer {
            calls: u32,
        }
        impl TextRecognizer for FlakyRecognizer {
            fn name(&self) -> &'static str {
                "flaky"
            }
            fn recognize(&mut self, _: &Frame) -> Result<Vec<TextLine>> {
                self.calls += 1;
                if self.calls == 1 {
                    Err(anyhow!("engine hiccup"))
                } else {
                    Ok(vec![TextLine::new("ok1", 0.9)])
                }
            }
        }

        let mut detector = StubDetector::new()
            .with_boxes(0, vec![plate_box(0.9)])
            .with_boxes(1, vec![plate_box(0.9)]);
        let mut recognizer = FlakyRecognizer { calls: 0 };
        let readings: Vec<_> = FramePipeline::new(
            job(),
            frames(2),
            &mut detector,
            &mut recognizer,
            settings(1),
        )
        .collect();

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].plate_text, "OK1");
    }

    #[test]
    fn settings_validation() {
        assert!(PipelineSettings::default().validate().is_ok());
        assert!(settings(0).validate().is_err());
        let bad = PipelineSettings {
            recognition_threshold: 1.5,
            ..PipelineSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
