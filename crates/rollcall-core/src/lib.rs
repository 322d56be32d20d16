//! rollcall-core: Attendance decisions from live face detections.
//!
//! Builds the enrolled descriptor store, classifies faces by nearest
//! embedding, runs the single-record session policy and writes the CSV
//! attendance log. Face detection (SCRFD) and embedding (ArcFace) run via
//! ONNX Runtime behind the [`FaceEncoder`] seam.

pub mod attendance;
pub mod classifier;
pub mod detector;
pub mod encoder;
pub mod log_writer;
pub mod mismatch;
pub mod recognizer;
pub mod record;
pub mod session;
pub mod store;
pub mod types;

pub use attendance::{
    AttendanceSession, Clock, FrameSource, RenderError, Renderer, SessionError, SessionOptions,
    SessionOutcome, SystemClock,
};
pub use classifier::{Classification, ClassifiedFace, EuclideanMatcher};
pub use encoder::{EncoderError, FaceEncoder, OnnxEncoder};
pub use log_writer::LogWriter;
pub use record::{AttendanceRecord, Subject};
pub use session::{SessionTiming, TerminalReason};
pub use store::{DescriptorStore, StoreError};
pub use types::{BoundingBox, Detection, Embedding, Identity};
