//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640x640 model input, decodes the three
//! anchor-free stride levels and suppresses overlapping boxes.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).min(SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).min(SCRFD_INPUT_SIZE);
        Self {
            scale,
            width: new_w.max(1),
            height: new_h.max(1),
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Scored box in frame coordinates, before clipping to pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    fn to_bbox(self, width: u32, height: u32) -> Option<BoundingBox> {
        let clip = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        BoundingBox::new(
            clip(self.y1, height),
            clip(self.x2, width),
            clip(self.y2, height),
            clip(self.x1, width),
        )
    }
}

/// Output tensor indices for one stride: (score, bbox).
type StrideOutputs = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.outputs[level];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_level(scores, deltas, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces: Vec<BoundingBox> = suppress(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter_map(|c| c.to_bbox(width, height))
            .collect();

        tracing::debug!(count = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Resize into the letterboxed NCHW tensor. Padding stays at zero, which is
/// exactly the normalized value of `SCRFD_MEAN`.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = frame.dimensions();
    let letterbox = Letterbox::fit(width, height);
    let resized = imageops::resize(frame, letterbox.width, letterbox.height, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        let tx = ((x + letterbox.pad_x) as usize).min(size - 1);
        let ty = ((y + letterbox.pad_y) as usize).min(size - 1);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map output tensors to stride levels, by name ("score_8", "bbox_16", ...)
/// when the export carries them, otherwise by the standard positional order
/// `[scores 8/16/32, bboxes 8/16/32, kps 8/16/32]`.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: u32| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode one stride level into frame-space candidates above `threshold`.
fn decode_level(
    scores: &[f32],
    deltas: &[f32],
    stride: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_w = (SCRFD_INPUT_SIZE / stride) as usize;
    let grid_h = grid_w;
    let step = stride as f32;
    let anchors = (grid_w * grid_h * SCRFD_ANCHORS_PER_CELL).min(scores.len());

    (0..anchors)
        .filter(|&idx| scores[idx] > threshold)
        .filter_map(|idx| {
            let d = deltas.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);
            Some(Candidate { x1, y1, x2, y2, score: scores[idx] })
        })
        .collect()
}

/// Non-maximum suppression; survivors come back sorted by descending score.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_iou_identical() {
        let a = cand(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 15.0, 10.0, 1.0);
        // Overlap 50, union 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppress_keeps_best_of_overlapping() {
        let result = suppress(
            vec![
                cand(0.0, 0.0, 10.0, 10.0, 0.7),
                cand(1.0, 1.0, 11.0, 11.0, 0.9),
                cand(50.0, 50.0, 60.0, 60.0, 0.8),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.8);
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::fit(640, 480);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
        let (x, y) = lb.unmap(100.0, 180.0);
        assert!((x - 100.0).abs() < 1e-6);
        assert!((y - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 80);
        // Padding row stays at the normalized mean
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Image content is normalized white
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 1, 320, 320]] - white).abs() < 1e-4);
    }

    #[test]
    fn test_decode_level_single_anchor() {
        let stride = 32u32;
        let grid = (SCRFD_INPUT_SIZE / stride) as usize;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut deltas = vec![0.0f32; anchors * 4];

        // Cell (col 2, row 3), first anchor: center (64, 96)
        let idx = (3 * grid + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        deltas[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox { scale: 1.0, width: 640, height: 640, pad_x: 0, pad_y: 0 };
        let out = decode_level(&scores, &deltas, stride, &lb, 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], cand(32.0, 64.0, 96.0, 128.0, 0.9));

        let bbox = out[0].to_bbox(640, 640).unwrap();
        assert_eq!(bbox, BoundingBox { top: 64, right: 96, bottom: 128, left: 32 });
    }

    #[test]
    fn test_output_layout_by_name() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "bbox_32", "score_32", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_layout(&names), [(1, 0), (4, 3), (7, 6)]);
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        assert_eq!(output_layout(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
