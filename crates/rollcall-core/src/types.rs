use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
///
/// Stored in (top, right, bottom, left) order. A valid box always has
/// `top < bottom` and `left < right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    /// Build a box, rejecting empty or inverted extents.
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Option<Self> {
        if top < bottom && left < right {
            Some(Self { top, right, bottom, left })
        } else {
            None
        }
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Clip the box to a `width` x `height` frame.
    ///
    /// Returns `None` if nothing of the box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        Self::new(
            self.top.min(height),
            self.right.min(width),
            self.bottom.min(height),
            self.left.min(width),
        )
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person: name taken from the reference image, plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
}

/// A face found in a live frame, together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}
