#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{PlateDetector, TextRecognizer};
use crate::detect::result::{DetectionBox, TextLine};
use crate::frame::{Frame, FrameSample};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const RECOGNIZER_HEIGHT: u32 = 48;
const RECOGNIZER_MAX_WIDTH: u32 = 320;

fn load_plan(model_path: &Path, width: u32, height: u32) -> Result<OnnxPlan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
}

// ----------------------------------------------------------------------------
// Detector
// ----------------------------------------------------------------------------

/// YOLO-style plate detector on ONNX.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` (or its
/// transpose) holding `cx, cy, w, h` in model input pixels followed by
/// per-class scores. Frames are stretched to the model input size and boxes
/// are scaled back to frame pixels.
pub struct TractDetector {
    plan: OnnxPlan,
    input_width: u32,
    input_height: u32,
    nms_threshold: f32,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let plan = load_plan(model_path.as_ref(), input_width, input_height)?;
        Ok(Self {
            plan,
            input_width,
            input_height,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        })
    }

    /// Override the IoU above which overlapping boxes are suppressed.
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = to_rgb_image(frame)?;
        let resized = imageops::resize(
            &image,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let width = self.input_width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, width),
            |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        output: &Tensor,
        frame_width: u32,
        frame_height: u32,
        threshold: f32,
    ) -> Result<Vec<DetectionBox>> {
        let view = output
            .to_array_view::<f32>()
            .context("detector output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("detector output must have rank 3")?;
        let (_, rows, cols) = view.dim();
        let channels_first = rows < cols;
        let (channels, anchors) = if channels_first {
            (rows, cols)
        } else {
            (cols, rows)
        };
        if channels < 5 {
            return Err(anyhow!(
                "detector output has {} channels; expected at least 5",
                channels
            ));
        }
        let at = |anchor: usize, channel: usize| {
            if channels_first {
                view[[0, channel, anchor]]
            } else {
                view[[0, anchor, channel]]
            }
        };

        let scale_x = frame_width as f32 / self.input_width as f32;
        let scale_y = frame_height as f32 / self.input_height as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let score = (4..channels)
                .map(|channel| at(anchor, channel))
                .fold(f32::NEG_INFINITY, f32::max);
            // Written this way so NaN scores are dropped.
            if !(score >= threshold) {
                continue;
            }
            let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
            candidates.push(DetectionBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
                score.min(1.0),
            ));
        }

        Ok(non_max_suppression(candidates, self.nms_threshold))
    }
}

impl PlateDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        sample: &FrameSample,
        confidence_threshold: f32,
    ) -> Result<Vec<DetectionBox>> {
        let input = self.build_input(&sample.frame)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("detector inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("detector produced no outputs"))?;
        self.decode(
            output,
            sample.frame.width(),
            sample.frame.height(),
            confidence_threshold,
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let sample = FrameSample {
            index: 0,
            frame: Frame::blank(self.input_width, self.input_height),
        };
        self.detect(&sample, 1.0).map(|_| ())
    }
}

/// Greedy class-agnostic NMS. Output is sorted by descending confidence.
fn non_max_suppression(mut boxes: Vec<DetectionBox>, iou_threshold: f32) -> Vec<DetectionBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectionBox> = Vec::new();
    for candidate in boxes {
        if kept
            .iter()
            .all(|existing| existing.iou(&candidate) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

// ----------------------------------------------------------------------------
// Recognizer
// ----------------------------------------------------------------------------

/// CRNN/CTC text recognizer on ONNX (PaddleOCR recognition export).
///
/// Crops are resized to a fixed height keeping their aspect ratio, right
/// padded to the model width, and normalized to `[-1, 1]`. The output of
/// shape `[1, steps, classes]` is decoded greedily; class 0 is the CTC blank,
/// classes `1..` follow the dictionary file, and a trailing space class is
/// appended.
pub struct TractRecognizer {
    plan: OnnxPlan,
    charset: Vec<String>,
    input_width: u32,
    input_height: u32,
}

impl TractRecognizer {
    pub fn new<P: AsRef<Path>, D: AsRef<Path>>(model_path: P, dictionary_path: D) -> Result<Self> {
        let dictionary_path = dictionary_path.as_ref();
        let raw = std::fs::read_to_string(dictionary_path).with_context(|| {
            format!(
                "failed to read recognizer dictionary {}",
                dictionary_path.display()
            )
        })?;
        let charset = build_charset(&raw);
        if charset.len() <= 2 {
            return Err(anyhow!(
                "recognizer dictionary {} is empty",
                dictionary_path.display()
            ));
        }

        let plan = load_plan(
            model_path.as_ref(),
            RECOGNIZER_MAX_WIDTH,
            RECOGNIZER_HEIGHT,
        )?;
        Ok(Self {
            plan,
            charset,
            input_width: RECOGNIZER_MAX_WIDTH,
            input_height: RECOGNIZER_HEIGHT,
        })
    }

    fn build_input(&self, crop: &Frame) -> Result<Tensor> {
        let image = to_rgb_image(crop)?;
        let ratio = crop.width() as f32 / crop.height().max(1) as f32;
        let target_width =
            ((self.input_height as f32 * ratio).ceil() as u32).clamp(1, self.input_width);
        let resized = imageops::resize(
            &image,
            target_width,
            self.input_height,
            FilterType::Triangle,
        );

        let target_width = target_width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                if x < target_width {
                    let value = pixels[(y * target_width + x) * 3 + channel] as f32 / 255.0;
                    (value - 0.5) / 0.5
                } else {
                    0.0
                }
            },
        );
        Ok(input.into_tensor())
    }
}

impl TextRecognizer for TractRecognizer {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Vec<TextLine>> {
        let input = self.build_input(crop)?;
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .context("recognizer inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("recognizer produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("recognizer output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("recognizer output must have rank 3")?;
        let (_, _, classes) = view.dim();
        let probabilities: Vec<f32> = view.iter().copied().collect();

        Ok(ctc_greedy_decode(&probabilities, classes, &self.charset)
            .into_iter()
            .collect())
    }
}

fn build_charset(dictionary: &str) -> Vec<String> {
    let mut charset = vec![String::new()];
    charset.extend(
        dictionary
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    charset.push(" ".to_string());
    charset
}

/// Collapse repeats, drop blanks, and average the kept step probabilities.
fn ctc_greedy_decode(probabilities: &[f32], classes: usize, charset: &[String]) -> Option<TextLine> {
    if classes == 0 {
        return None;
    }

    let mut text = String::new();
    let mut kept = Vec::new();
    let mut last = 0usize;
    for step in probabilities.chunks_exact(classes) {
        let (index, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });
        if index != 0 && index != last {
            if let Some(symbol) = charset.get(index) {
                text.push_str(symbol);
                kept.push(prob);
            }
        }
        last = index;
    }

    if text.trim().is_empty() {
        return None;
    }
    let confidence = kept.iter().sum::<f32>() / kept.len() as f32;
    Some(TextLine::new(text, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let boxes = vec![
            DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.6),
            DetectionBox::new(1.0, 0.0, 11.0, 10.0, 0.9),
            DetectionBox::new(50.0, 50.0, 60.0, 60.0, 0.7),
        ];
        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn charset_reserves_blank_and_space() {
        let charset = build_charset("A\r\nB\n\n1\n");
        assert_eq!(charset, vec!["", "A", "B", "1", " "]);
    }

    #[test]
    fn ctc_decode_collapses_repeats_and_blanks() {
        let charset = build_charset("A\nB\n");
        // classes: blank, A, B, space
        #[rustfmt::skip]
        let probabilities = vec![
            0.1, 0.8, 0.05, 0.05, // A
            0.1, 0.9, 0.0, 0.0,   // A (repeat)
            0.9, 0.1, 0.0, 0.0,   // blank
            0.0, 0.7, 0.3, 0.0,   // A
            0.0, 0.1, 0.6, 0.3,   // B
        ];
        let line = ctc_greedy_decode(&probabilities, 4, &charset).expect("text");
        assert_eq!(line.text, "AAB");
        assert!((line.confidence - (0.8 + 0.7 + 0.6) / 3.0).abs() < 1e-6);
    }

    #[test]
    fn ctc_decode_of_all_blanks_is_empty() {
        let charset = build_charset("A\n");
        let probabilities = vec![0.9, 0.1, 0.0, 0.8, 0.2, 0.0];
        assert!(ctc_greedy_decode(&probabilities, 3, &charset).is_none());
    }
}
