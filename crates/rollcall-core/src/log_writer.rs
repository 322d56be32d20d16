//! CSV attendance log writer.

use crate::record::AttendanceRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HEADER: [&str; 4] = ["Name", "Timestamp", "Detected", "Description"];

#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to flush {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes one record per file into a fixed directory.
#[derive(Debug, Clone)]
pub struct LogWriter {
    dir: PathBuf,
}

impl LogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record` to its own CSV file (header plus one row), replacing
    /// any file of the same name. Returns the file path.
    pub fn write(&self, record: &AttendanceRecord) -> Result<PathBuf, LogWriteError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| LogWriteError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(record.file_name());
        let csv_err = |source| LogWriteError::Csv { path: path.clone(), source };

        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        writer.write_record(HEADER).map_err(csv_err)?;
        writer
            .write_record([
                record.subject.as_str(),
                record.row_time().as_str(),
                record.detected_label(),
                record.description.as_str(),
            ])
            .map_err(csv_err)?;
        writer.flush().map_err(|source| LogWriteError::Flush { path: path.clone(), source })?;

        tracing::info!(path = %path.display(), subject = %record.subject, "attendance logged");
        Ok(path)
    }
}
