//! Face encoder seam: detection plus embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceEmbedder, RecognizerError};
use crate::types::{BoundingBox, Detection, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Locates faces in an image and maps each one to an embedding.
pub trait FaceEncoder {
    /// Find face boxes, best candidate first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError>;

    /// Extract one embedding per box, in box order.
    fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError>;

    /// Detect and embed in one pass. An image without faces yields an empty list.
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<Detection>, EncoderError> {
        let boxes = self.detect(image)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed(image, &boxes)?;
        Ok(boxes
            .into_iter()
            .zip(embeddings)
            .map(|(bbox, embedding)| Detection { bbox, embedding })
            .collect())
    }
}

/// SCRFD detection followed by ArcFace embedding, both on ONNX Runtime.
pub struct OnnxEncoder {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxEncoder {
    pub fn load(detector_path: &Path, embedder_path: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self { detector, embedder })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError> {
        faces
            .iter()
            .map(|face| self.embedder.extract(image, face).map_err(EncoderError::from))
            .collect()
    }
}
