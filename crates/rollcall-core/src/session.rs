//! Session policy as a pure state machine.
//!
//! A session waits for the first face, logs exactly one attendance decision
//! for it, keeps running for a grace period so the overlay stays visible, and
//! then terminates. If no face shows up before the no-face timeout, a single
//! "no face" decision is logged instead. All times are offsets on a monotonic
//! clock; wall-clock time never enters this module.

use crate::classifier::ClassifiedFace;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// How long to keep running after the first detection.
pub const DEFAULT_DETECTION_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for any face before giving up.
pub const DEFAULT_NO_FACE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub detection_grace: Duration,
    pub no_face_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            detection_grace: DEFAULT_DETECTION_GRACE,
            no_face_timeout: DEFAULT_NO_FACE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    FaceDetectedTimeout,
    NoFaceTimeout,
    ManualQuit,
    StreamFailure,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminalReason::FaceDetectedTimeout => "face detected, grace period elapsed",
            TerminalReason::NoFaceTimeout => "no face detected before timeout",
            TerminalReason::ManualQuit => "manual quit",
            TerminalReason::StreamFailure => "frame acquisition failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstDetection,
    LoggedAwaitingExit,
    Terminated(TerminalReason),
}

/// One input to the machine.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// A frame was acquired at `at`; `faces` are its classified detections
    /// in detector order.
    Frame { at: Duration, faces: &'a [ClassifiedFace] },
    /// The operator asked to stop.
    Quit,
    /// The frame source failed.
    StreamFailure,
}

/// Attendance decision the caller must turn into a record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRequest {
    /// First face of the session, classified.
    Face(ClassifiedFace),
    /// The no-face timeout elapsed without any detection.
    NoFace,
}

/// Result of one step: the next state and at most one log request.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: SessionState,
    pub log: Option<LogRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub started_at: Duration,
    pub first_detection_at: Option<Duration>,
    pub logged: bool,
    pub terminal_reason: Option<TerminalReason>,
}

impl SessionState {
    pub fn start(at: Duration) -> Self {
        Self {
            started_at: at,
            first_detection_at: None,
            logged: false,
            terminal_reason: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match (self.terminal_reason, self.first_detection_at) {
            (Some(reason), _) => Phase::Terminated(reason),
            (None, Some(_)) => Phase::LoggedAwaitingExit,
            (None, None) => Phase::AwaitingFirstDetection,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminal_reason.is_some()
    }

    /// Advance the machine by one event. Terminated states absorb everything.
    pub fn step(self, event: Event<'_>, timing: &SessionTiming) -> Step {
        let phase = self.phase();
        match (phase, event) {
            (Phase::Terminated(_), _) => self.stay(),

            (_, Event::Quit) => self.terminate(TerminalReason::ManualQuit, None),
            (_, Event::StreamFailure) => self.terminate(TerminalReason::StreamFailure, None),

            (Phase::AwaitingFirstDetection, Event::Frame { at, faces }) => match faces.first() {
                Some(first) => Step {
                    log: Some(LogRequest::Face(first.clone())),
                    state: Self {
                        first_detection_at: Some(at),
                        logged: true,
                        ..self
                    },
                },
                None if at.saturating_sub(self.started_at) >= timing.no_face_timeout => Step {
                    log: Some(LogRequest::NoFace),
                    state: Self {
                        logged: true,
                        terminal_reason: Some(TerminalReason::NoFaceTimeout),
                        ..self
                    },
                },
                None => self.stay(),
            },

            (Phase::LoggedAwaitingExit, Event::Frame { at, .. }) => {
                let since = self
                    .first_detection_at
                    .map(|first| at.saturating_sub(first))
                    .unwrap_or_default();
                if since >= timing.detection_grace {
                    self.terminate(TerminalReason::FaceDetectedTimeout, None)
                } else {
                    self.stay()
                }
            }
        }
    }

    fn stay(self) -> Step {
        Step { state: self, log: None }
    }

    fn terminate(self, reason: TerminalReason, log: Option<LogRequest>) -> Step {
        Step {
            state: Self {
                terminal_reason: Some(reason),
                ..self
            },
            log,
        }
    }
}
