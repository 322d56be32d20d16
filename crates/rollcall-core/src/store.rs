//! Descriptor store: the enrolled identities a session matches against.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::Identity;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reference image extensions accepted for enrollment (case-insensitive).
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("enrollment directory not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode enrollment image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

/// Ordered list of enrolled identities. Built once, then read-only.
///
/// Names are not deduplicated: `alice.jpg` and `alice.png` produce two
/// entries, and matching resolves them by distance.
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    identities: Vec<Identity>,
}

impl DescriptorStore {
    /// Enroll every reference image in `dir`.
    ///
    /// Each image contributes the embedding of its first detected face under
    /// the file stem as name. Images without a face are skipped. Files are
    /// visited in file-name order, which fixes registration indices.
    pub fn build<E: FaceEncoder + ?Sized>(dir: &Path, encoder: &mut E) -> Result<Self, StoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(dir.to_path_buf()),
            _ => StoreError::Io { path: dir.to_path_buf(), source: e },
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io { path: dir.to_path_buf(), source: e })?;
            let path = entry.path();
            if path.is_file() && is_reference_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut identities = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                tracing::warn!(path = %path.display(), "skipping enrollment image with non-UTF-8 name");
                continue;
            };

            let image = image::open(&path)
                .map_err(|source| StoreError::Image { path: path.clone(), source })?
                .to_rgb8();

            let Some(first) = encoder.encode(&image)?.into_iter().next() else {
                tracing::info!(path = %path.display(), "no face in enrollment image; skipped");
                continue;
            };

            tracing::debug!(name = %name, dim = first.embedding.dim(), "enrolled identity");
            identities.push(Identity { name, embedding: first.embedding });
        }

        tracing::info!(dir = %dir.display(), count = identities.len(), "descriptor store built");
        Ok(Self { identities })
    }

    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::{Rgb, RgbImage};

    /// Treats a non-black top-left pixel as one face; embeds that pixel.
    struct PixelEncoder;

    impl FaceEncoder for PixelEncoder {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError> {
            if image.get_pixel(0, 0).0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(BoundingBox::new(0, image.width(), image.height(), 0).into_iter().collect())
        }

        fn embed(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError> {
            let px = image.get_pixel(0, 0).0;
            Ok(faces
                .iter()
                .map(|_| Embedding::new(px.iter().map(|&c| c as f32 / 255.0).collect()))
                .collect())
        }
    }

    fn write_image(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color)).save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_build_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("known_faces");
        let err = DescriptorStore::build(&missing, &mut PixelEncoder).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(p) if p == missing));
    }

    #[test]
    fn test_build_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DescriptorStore::build(tmp.path(), &mut PixelEncoder).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_build_names_from_stems_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), "carol.png", [10, 10, 10]);
        write_image(tmp.path(), "alice.png", [200, 0, 0]);
        write_image(tmp.path(), "bob.PNG", [0, 200, 0]);

        let store = DescriptorStore::build(tmp.path(), &mut PixelEncoder).unwrap();
        let names: Vec<&str> = store.identities().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(store.identities()[1].embedding.dim(), 3);
    }

    #[test]
    fn test_build_skips_faceless_and_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), "alice.png", [200, 0, 0]);
        write_image(tmp.path(), "nobody.png", [0, 0, 0]);
        std::fs::write(tmp.path().join("notes.txt"), "not an image").unwrap();
        std::fs::create_dir(tmp.path().join("nested.png")).unwrap();

        let store = DescriptorStore::build(tmp.path(), &mut PixelEncoder).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.identities()[0].name, "alice");
    }

    #[test]
    fn test_build_rejects_corrupt_image() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();
        let err = DescriptorStore::build(tmp.path(), &mut PixelEncoder).unwrap_err();
        assert!(matches!(err, StoreError::Image { .. }));
    }

    #[test]
    fn test_reference_image_extensions() {
        assert!(is_reference_image(Path::new("a.jpg")));
        assert!(is_reference_image(Path::new("a.JPEG")));
        assert!(is_reference_image(Path::new("a.Png")));
        assert!(!is_reference_image(Path::new("a.gif")));
        assert!(!is_reference_image(Path::new("jpg")));
    }
}
