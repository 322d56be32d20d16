//! The attendance session loop.
//!
//! One iteration acquires a frame, classifies every face in it, steps the
//! session machine, renders the overlay and polls for a quit request. The
//! frame source is owned by the session and dropped as soon as the loop ends,
//! before the attendance log is written.

use crate::classifier::{Classification, ClassifiedFace, EuclideanMatcher};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::log_writer::{LogWriteError, LogWriter};
use crate::mismatch::{capture_mismatch, CaptureError, DEFAULT_MISMATCH_DIR};
use crate::record::AttendanceRecord;
use crate::session::{Event, LogRequest, SessionState, SessionTiming, TerminalReason};
use crate::store::DescriptorStore;
use crate::types::Detection;
use chrono::NaiveDateTime;
use image::RgbImage;
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default bounded wait for the quit key on each iteration.
pub const DEFAULT_QUIT_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
    #[error("mismatch capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("attendance log failed: {0}")]
    Log(#[from] LogWriteError),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of live frames, polled once per iteration.
pub trait FrameSource {
    type Error: Display;

    fn next_frame(&mut self) -> Result<RgbImage, Self::Error>;
}

/// Presents annotated frames and reports the operator's quit request.
pub trait Renderer {
    fn render(&mut self, frame: &RgbImage, faces: &[ClassifiedFace]) -> Result<(), RenderError>;

    /// Wait up to `timeout` for a quit request.
    fn poll_quit(&mut self, timeout: Duration) -> Result<bool, RenderError>;
}

/// Time source for a session: a monotonic offset for deadlines and local
/// wall-clock time for record timestamps.
pub trait Clock {
    fn elapsed(&self) -> Duration;
    fn wall(&self) -> NaiveDateTime;
}

/// Production clock: `Instant` for deadlines, local time for records.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn wall(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timing: SessionTiming,
    pub quit_poll: Duration,
    pub mismatch_dir: PathBuf,
    pub log_writer: LogWriter,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timing: SessionTiming::default(),
            quit_poll: DEFAULT_QUIT_POLL,
            mismatch_dir: PathBuf::from(DEFAULT_MISMATCH_DIR),
            log_writer: LogWriter::new("."),
        }
    }
}

/// How a session ended and what it wrote.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub reason: TerminalReason,
    pub record: Option<AttendanceRecord>,
    pub log_path: Option<PathBuf>,
    pub mismatch_path: Option<PathBuf>,
    /// Frame source error message, for `StreamFailure`.
    pub stream_error: Option<String>,
    pub frames: u64,
}

/// One attendance session over borrowed collaborators.
pub struct AttendanceSession<'a, E: ?Sized, R: ?Sized, C: ?Sized> {
    store: &'a DescriptorStore,
    matcher: EuclideanMatcher,
    encoder: &'a mut E,
    renderer: &'a mut R,
    clock: &'a C,
    options: SessionOptions,
}

impl<'a, E, R, C> AttendanceSession<'a, E, R, C>
where
    E: FaceEncoder + ?Sized,
    R: Renderer + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(
        store: &'a DescriptorStore,
        matcher: EuclideanMatcher,
        encoder: &'a mut E,
        renderer: &'a mut R,
        clock: &'a C,
        options: SessionOptions,
    ) -> Self {
        Self { store, matcher, encoder, renderer, clock, options }
    }

    /// Run until the session terminates, then release `source` and write the
    /// attendance log if a record was produced.
    pub fn run<S: FrameSource>(mut self, mut source: S) -> Result<SessionOutcome, SessionError> {
        let timing = self.options.timing;
        let mut state = SessionState::start(self.clock.elapsed());
        let mut record: Option<AttendanceRecord> = None;
        let mut mismatch_path = None;
        let mut stream_error = None;
        let mut frames = 0u64;

        tracing::info!(
            enrolled = self.store.len(),
            threshold = self.matcher.threshold(),
            "attendance session started"
        );

        let reason = loop {
            let now = self.clock.elapsed();

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "failed to grab frame");
                    stream_error = Some(e.to_string());
                    state = state.step(Event::StreamFailure, &timing).state;
                    break TerminalReason::StreamFailure;
                }
            };
            frames += 1;

            let faces = self.classify_frame(&frame)?;
            let step = state.step(Event::Frame { at: now, faces: &faces }, &timing);
            state = step.state;

            if let Some(request) = step.log {
                let (new_record, capture) = self.make_record(request, &frame)?;
                tracing::info!(
                    subject = %new_record.subject,
                    detected = new_record.detected_label(),
                    "attendance decided"
                );
                record = Some(new_record);
                mismatch_path = capture;
            }

            self.renderer.render(&frame, &faces)?;

            if let Some(reason) = state.terminal_reason {
                break reason;
            }

            if self.renderer.poll_quit(self.options.quit_poll)? {
                state = state.step(Event::Quit, &timing).state;
                break TerminalReason::ManualQuit;
            }
        };

        drop(source);
        tracing::info!(%reason, frames, logged = state.logged, "session terminated");

        let log_path = match &record {
            Some(r) => Some(self.options.log_writer.write(r)?),
            None => None,
        };

        Ok(SessionOutcome {
            reason,
            record,
            log_path,
            mismatch_path,
            stream_error,
            frames,
        })
    }

    fn classify_frame(&mut self, frame: &RgbImage) -> Result<Vec<ClassifiedFace>, EncoderError> {
        let detections: Vec<Detection> = self.encoder.encode(frame)?;
        let faces = self.matcher.classify_all(&detections, self.store);
        if !faces.is_empty() {
            tracing::debug!(
                labels = ?faces.iter().map(|f| f.classification.label()).collect::<Vec<_>>(),
                "faces in frame"
            );
        }
        Ok(faces)
    }

    /// Turn a log request into a record, capturing the crop of an unknown face.
    fn make_record(
        &self,
        request: LogRequest,
        frame: &RgbImage,
    ) -> Result<(AttendanceRecord, Option<PathBuf>), CaptureError> {
        let timestamp = self.clock.wall();
        Ok(match request {
            LogRequest::NoFace => (AttendanceRecord::no_face(timestamp), None),
            LogRequest::Face(face) => match face.classification {
                Classification::Matched(name) => {
                    (AttendanceRecord::matched(name, timestamp), None)
                }
                Classification::Unmatched => {
                    let capture = capture_mismatch(frame, &face.bbox, &timestamp, &self.options.mismatch_dir)?;
                    let record = AttendanceRecord::unknown(timestamp, &capture);
                    (record, Some(capture.path))
                }
            },
        })
    }
}
