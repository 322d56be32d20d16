//! Attendance records and the file names that encode them.

use crate::classifier::UNKNOWN_LABEL;
use crate::mismatch::MismatchCapture;
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Serialize, Serializer};
use std::fmt;

/// Subject written when the session ends without seeing a face.
pub const NO_FACE_SUBJECT: &str = "no-face";

const MATCHED_DESCRIPTION: &str = "Face Matched";
const NO_FACE_DESCRIPTION: &str = "No face detected";

/// `<date>_<12-hour time>_<AM|PM>`, filesystem safe.
const FILE_STAMP_FORMAT: &str = "%Y-%m-%d_%I-%M-%S_%p";
/// Length of a formatted [`FILE_STAMP_FORMAT`] stamp.
const FILE_STAMP_LEN: usize = 22;
/// Timestamp column inside the CSV.
const ROW_TIME_FORMAT: &str = "%I:%M:%S %p";
const LOG_EXTENSION: &str = ".csv";

/// Who a record is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Identity(String),
    Unknown,
    NoFace,
}

impl Subject {
    pub fn as_str(&self) -> &str {
        match self {
            Subject::Identity(name) => name,
            Subject::Unknown => UNKNOWN_LABEL,
            Subject::NoFace => NO_FACE_SUBJECT,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The single attendance row a session produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub subject: Subject,
    /// Local wall-clock time, whole seconds.
    pub timestamp: NaiveDateTime,
    pub detected: bool,
    pub description: String,
}

impl AttendanceRecord {
    /// A face that matched an enrolled identity.
    pub fn matched(name: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            subject: Subject::Identity(name.into()),
            timestamp: timestamp.trunc_subsecs(0),
            detected: true,
            description: MATCHED_DESCRIPTION.into(),
        }
    }

    /// A face that matched nobody; its crop was saved as `capture`.
    pub fn unknown(timestamp: NaiveDateTime, capture: &MismatchCapture) -> Self {
        Self {
            subject: Subject::Unknown,
            timestamp: timestamp.trunc_subsecs(0),
            detected: true,
            description: capture.describe(),
        }
    }

    /// No face appeared before the timeout.
    pub fn no_face(timestamp: NaiveDateTime) -> Self {
        Self {
            subject: Subject::NoFace,
            timestamp: timestamp.trunc_subsecs(0),
            detected: false,
            description: NO_FACE_DESCRIPTION.into(),
        }
    }

    pub fn detected_label(&self) -> &'static str {
        if self.detected { "Yes" } else { "No" }
    }

    /// Timestamp as written in the CSV row, e.g. `08:15:09 AM`.
    pub fn row_time(&self) -> String {
        self.timestamp.format(ROW_TIME_FORMAT).to_string()
    }

    pub fn file_name(&self) -> String {
        log_file_name(&self.timestamp, self.subject.as_str())
    }
}

/// Format a stamp for file names, e.g. `2024-03-07_08-15-09_AM`.
pub fn file_stamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(FILE_STAMP_FORMAT).to_string()
}

/// Log file name for a record, e.g. `2024-03-07_08-15-09_AM_alice.csv`.
pub fn log_file_name(timestamp: &NaiveDateTime, subject: &str) -> String {
    format!("{}_{subject}{LOG_EXTENSION}", file_stamp(timestamp))
}

/// Recover the timestamp and subject encoded by [`log_file_name`].
pub fn parse_log_file_name(name: &str) -> Option<(NaiveDateTime, String)> {
    let stem = name.strip_suffix(LOG_EXTENSION)?;
    let stamp = stem.get(..FILE_STAMP_LEN)?;
    let subject = stem.get(FILE_STAMP_LEN..)?.strip_prefix('_')?;
    if subject.is_empty() {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(stamp, FILE_STAMP_FORMAT).ok()?;
    Some((timestamp, subject.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_file_name_morning() {
        let record = AttendanceRecord::matched("alice", at(8, 15, 9));
        assert_eq!(record.file_name(), "2024-03-07_08-15-09_AM_alice.csv");
        assert_eq!(record.row_time(), "08:15:09 AM");
        assert_eq!(record.detected_label(), "Yes");
        assert_eq!(record.description, "Face Matched");
    }

    #[test]
    fn test_file_name_afternoon_no_face() {
        let record = AttendanceRecord::no_face(at(15, 0, 42));
        assert_eq!(record.file_name(), "2024-03-07_03-00-42_PM_no-face.csv");
        assert_eq!(record.detected_label(), "No");
        assert_eq!(record.description, "No face detected");
    }

    #[test]
    fn test_noon_and_midnight() {
        assert_eq!(file_stamp(&at(12, 0, 0)), "2024-03-07_12-00-00_PM");
        assert_eq!(file_stamp(&at(0, 0, 0)), "2024-03-07_12-00-00_AM");
    }

    #[test]
    fn test_stamp_length_constant() {
        assert_eq!(file_stamp(&at(23, 59, 59)).len(), FILE_STAMP_LEN);
    }

    #[test]
    fn test_parse_recovers_record_fields() {
        let timestamp = at(21, 4, 5).with_nanosecond(123_000_000).unwrap();
        for record in [
            AttendanceRecord::matched("mary_jane smith", timestamp),
            AttendanceRecord::no_face(timestamp),
        ] {
            let (ts, subject) = parse_log_file_name(&record.file_name()).unwrap();
            assert_eq!(ts, record.timestamp);
            assert_eq!(subject, record.subject.as_str());
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_log_file_name("attendance_log_08-15-09_AM.csv").is_none());
        assert!(parse_log_file_name("2024-03-07_08-15-09_AM_.csv").is_none());
        assert!(parse_log_file_name("2024-03-07_08-15-09_AM_alice.txt").is_none());
        assert!(parse_log_file_name("2024-03-07_13-15-09_AM_alice.csv").is_none());
        assert!(parse_log_file_name("é.csv").is_none());
    }
}
