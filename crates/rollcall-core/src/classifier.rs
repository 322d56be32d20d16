//! Nearest-identity face classification.
//!
//! Matching is a two-step protocol: first pick the enrolled identity with the
//! smallest Euclidean distance to the probe, then gate that one identity on
//! the match threshold. A nearest neighbour that fails the gate yields
//! [`Classification::Unmatched`], never a best guess.

use crate::store::DescriptorStore;
use crate::types::{BoundingBox, Detection, Embedding};
use serde::Serialize;

/// Maximum Euclidean distance for a positive match.
///
/// Embeddings are L2-normalized, so distance is `sqrt(2 - 2 * cos)`; 1.10
/// accepts pairs with cosine similarity of about 0.40 or more.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.10;

/// Distances closer than this are treated as equal; the earlier identity wins.
const TIE_TOLERANCE: f32 = 1e-6;

/// Label used for faces that match no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "name", rename_all = "snake_case")]
pub enum Classification {
    Matched(String),
    Unmatched,
}

impl Classification {
    /// Display label: the identity name, or "Unknown".
    pub fn label(&self) -> &str {
        match self {
            Classification::Matched(name) => name,
            Classification::Unmatched => UNKNOWN_LABEL,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Classification::Matched(_))
    }
}

/// A live face together with its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFace {
    pub bbox: BoundingBox,
    pub classification: Classification,
}

/// Closest enrolled identity to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Registration index in the store.
    pub index: usize,
    pub distance: f32,
}

/// Euclidean nearest-neighbour matcher with a single distance threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the closest identity, or `None` for an empty store.
    ///
    /// Scans the whole store; on a tie the lowest registration index wins.
    pub fn nearest(&self, probe: &Embedding, store: &DescriptorStore) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;

        for (index, identity) in store.identities().iter().enumerate() {
            let distance = probe.euclidean_distance(&identity.embedding);
            let closer = match best {
                None => true,
                Some(b) => distance < b.distance - TIE_TOLERANCE,
            };
            if closer {
                best = Some(Nearest { index, distance });
            }
        }

        best
    }

    /// Whether a distance passes the match gate.
    pub fn is_match(&self, distance: f32) -> bool {
        distance <= self.threshold
    }

    /// Classify a probe embedding against the store.
    pub fn classify(&self, probe: &Embedding, store: &DescriptorStore) -> Classification {
        match self.nearest(probe, store) {
            Some(n) if self.is_match(n.distance) => {
                Classification::Matched(store.identities()[n.index].name.clone())
            }
            _ => Classification::Unmatched,
        }
    }

    /// Classify every detection in a frame, preserving detection order.
    pub fn classify_all(&self, detections: &[Detection], store: &DescriptorStore) -> Vec<ClassifiedFace> {
        detections
            .iter()
            .map(|d| ClassifiedFace {
                bbox: d.bbox,
                classification: self.classify(&d.embedding, store),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn identity(name: &str, values: Vec<f32>) -> Identity {
        Identity { name: name.into(), embedding: Embedding::new(values) }
    }

    fn store(entries: Vec<Identity>) -> DescriptorStore {
        DescriptorStore::from_identities(entries)
    }

    #[test]
    fn test_empty_store_is_unmatched() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher::default().classify(&probe, &DescriptorStore::default());
        assert_eq!(result, Classification::Unmatched);
    }

    #[test]
    fn test_exact_match() {
        let s = store(vec![
            identity("bob", vec![1.0, 1.0]),
            identity("alice", vec![0.0, 0.1]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.1]);
        assert_eq!(
            EuclideanMatcher::default().classify(&probe, &s),
            Classification::Matched("alice".into())
        );
    }

    #[test]
    fn test_nearest_beyond_threshold_is_unmatched() {
        // Only candidate sits at distance 0.7 with a 0.6 gate.
        let s = store(vec![identity("alice", vec![0.7, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = EuclideanMatcher::new(0.6);

        let nearest = matcher.nearest(&probe, &s).unwrap();
        assert_eq!(nearest.index, 0);
        assert!((nearest.distance - 0.7).abs() < 1e-6);
        assert_eq!(matcher.classify(&probe, &s), Classification::Unmatched);
    }

    #[test]
    fn test_default_threshold_fits_unit_embeddings() {
        let s = store(vec![identity("alice", vec![1.0, 0.0])]);
        let matcher = EuclideanMatcher::default();

        // cos 0.6: same person under a different pose or light
        let similar = Embedding::new(vec![0.6, 0.8]);
        assert!((matcher.nearest(&similar, &s).unwrap().distance - 0.894).abs() < 1e-3);
        assert_eq!(matcher.classify(&similar, &s), Classification::Matched("alice".into()));

        // cos 0.3: a different person
        let other = Embedding::new(vec![0.3, 0.953_939_2]);
        assert_eq!(matcher.classify(&other, &s), Classification::Unmatched);

        // The same pair fails a 0.6 gate.
        assert_eq!(EuclideanMatcher::new(0.6).classify(&similar, &s), Classification::Unmatched);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let s = store(vec![identity("alice", vec![0.5, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        assert!(EuclideanMatcher::new(0.5).classify(&probe, &s).is_match());
    }

    #[test]
    fn test_tie_goes_to_lowest_index() {
        // Both at distance 0.3 from the probe, both inside the gate.
        let s = store(vec![
            identity("first", vec![0.3, 0.0]),
            identity("second", vec![0.0, 0.3]),
            identity("third", vec![-0.3, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = EuclideanMatcher::default();
        assert_eq!(matcher.nearest(&probe, &s).unwrap().index, 0);
        assert_eq!(matcher.classify(&probe, &s), Classification::Matched("first".into()));
    }

    #[test]
    fn test_duplicate_names_are_independent_entries() {
        let s = store(vec![
            identity("alice", vec![5.0, 5.0]),
            identity("alice", vec![0.1, 0.0]),
        ]);
        let probe = Embedding::new(vec![0.0, 0.0]);
        let matcher = EuclideanMatcher::default();
        assert_eq!(matcher.nearest(&probe, &s).unwrap().index, 1);
        assert_eq!(matcher.classify(&probe, &s), Classification::Matched("alice".into()));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let s = store(vec![
            identity("alice", vec![0.2, 0.1]),
            identity("bob", vec![0.1, 0.2]),
        ]);
        let probe = Embedding::new(vec![0.15, 0.15]);
        let matcher = EuclideanMatcher::default();
        let first = matcher.classify(&probe, &s);
        for _ in 0..10 {
            assert_eq!(matcher.classify(&probe, &s), first);
        }
    }

    #[test]
    fn test_classify_all_keeps_order() {
        let s = store(vec![identity("alice", vec![0.0, 0.0])]);
        let detections = vec![
            Detection {
                bbox: BoundingBox::new(0, 10, 10, 0).unwrap(),
                embedding: Embedding::new(vec![9.0, 9.0]),
            },
            Detection {
                bbox: BoundingBox::new(20, 40, 40, 20).unwrap(),
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
        ];
        let faces = EuclideanMatcher::default().classify_all(&detections, &s);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].classification.label(), "Unknown");
        assert_eq!(faces[1].classification.label(), "alice");
        assert_eq!(faces[1].bbox, detections[1].bbox);
    }
}
