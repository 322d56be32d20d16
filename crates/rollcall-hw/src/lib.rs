//! rollcall-hw: Webcam capture for attendance sessions.
//!
//! Provides V4L2 camera access with YUYV-to-RGB conversion, exposed to the
//! session loop as a [`rollcall_core::FrameSource`].

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::FrameError;
