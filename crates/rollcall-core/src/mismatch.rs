//! Mismatch capture: keep a crop of a face that matched nobody.

use crate::record::file_stamp;
use crate::types::BoundingBox;
use chrono::NaiveDateTime;
use image::imageops;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default directory for mismatch crops, relative to the working directory.
pub const DEFAULT_MISMATCH_DIR: &str = "mismatches";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("face box {bbox:?} lies outside the {width}x{height} frame")]
    OutOfFrame { bbox: BoundingBox, width: u32, height: u32 },
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save mismatch crop {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A saved crop of an unmatched face.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchCapture {
    pub path: PathBuf,
    /// Region that was cropped, clipped to the frame.
    pub bbox: BoundingBox,
}

impl MismatchCapture {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Record description naming the crop file and its coordinates as
    /// (top, left, bottom, right).
    pub fn describe(&self) -> String {
        let b = &self.bbox;
        format!(
            "Mismatch face captured; saved as {}. Coordinates: ({}, {}, {}, {})",
            self.file_name(),
            b.top,
            b.left,
            b.bottom,
            b.right
        )
    }
}

/// Crop file name, e.g. `mismatch_2024-03-07_08-15-09_AM.jpg`.
pub fn mismatch_file_name(timestamp: &NaiveDateTime) -> String {
    format!("mismatch_{}.jpg", file_stamp(timestamp))
}

/// Crop `bbox` out of `frame` and save it as a JPEG in `dir`.
pub fn capture_mismatch(
    frame: &RgbImage,
    bbox: &BoundingBox,
    timestamp: &NaiveDateTime,
    dir: &Path,
) -> Result<MismatchCapture, CaptureError> {
    let (width, height) = frame.dimensions();
    let region = bbox.clamp_to(width, height).ok_or(CaptureError::OutOfFrame {
        bbox: *bbox,
        width,
        height,
    })?;

    std::fs::create_dir_all(dir).map_err(|source| CaptureError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(mismatch_file_name(timestamp));
    imageops::crop_imm(frame, region.left, region.top, region.width(), region.height())
        .to_image()
        .save(&path)
        .map_err(|source| CaptureError::Save { path: path.clone(), source })?;

    tracing::info!(path = %path.display(), ?region, "mismatch face captured");
    Ok(MismatchCapture { path, bbox: region })
}
