//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{avg_brightness, yuyv_to_rgb, FrameError};
use image::RgbImage;
use rollcall_core::FrameSource;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const YUYV: &[u8; 4] = b"YUYV";

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation failed: {0}")]
    Format(String),
    #[error("failed to start streaming: {0}")]
    Stream(#[source] io::Error),
    #[error("frame grab failed: {0}")]
    Grab(#[source] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A V4L2 capture node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Dequeues filled YUYV buffers from a running stream.
trait BufferSource {
    /// Next filled buffer and its driver sequence number.
    fn dequeue(&mut self) -> io::Result<(&[u8], u32)>;
}

impl BufferSource for MmapStream<'static> {
    fn dequeue(&mut self) -> io::Result<(&[u8], u32)> {
        let (buf, meta) = CaptureStream::next(self)?;
        Ok((buf, meta.sequence))
    }
}

/// One stream kept open for every grab, warm-up included.
struct YuyvStream<B> {
    buffers: B,
    width: u32,
    height: u32,
}

impl<B: BufferSource> YuyvStream<B> {
    fn grab(&mut self) -> Result<(RgbImage, u32), CameraError> {
        let (buf, sequence) = self.buffers.dequeue().map_err(CameraError::Grab)?;
        let image = yuyv_to_rgb(buf, self.width, self.height)?;
        Ok((image, sequence))
    }

    fn warm_up(&mut self, count: usize) -> Result<(), CameraError> {
        for _ in 0..count {
            let (image, seq) = self.grab()?;
            tracing::debug!(seq, brightness = avg_brightness(&image), "warm-up frame");
        }
        Ok(())
    }
}

/// Open webcam streaming YUYV frames as RGB.
///
/// The mmap stream is set up once in [`Camera::open`] and reused for every
/// frame. Dropping the camera stops the stream and closes the device.
pub struct Camera {
    stream: YuyvStream<MmapStream<'static>>,
    path: String,
}

impl Camera {
    /// Open `path` (e.g. "/dev/video0"), negotiate YUYV at 640x480 and map
    /// the capture buffers.
    pub fn open(path: &str) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::NotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|source| match source.raw_os_error() {
            Some(16) => CameraError::Busy(path.to_string()), // EBUSY
            _ => CameraError::Open { path: path.to_string(), source },
        })?;

        let caps = device.query_caps().map_err(|source| CameraError::Open {
            path: path.to_string(),
            source,
        })?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_string()));
        }
        tracing::info!(device = path, card = %caps.card, driver = %caps.driver, "camera opened");

        let (width, height) = negotiate_yuyv(&device)?;

        // The stream shares the device handle, so it outlives `device` here.
        let buffers = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(CameraError::Stream)?;
        tracing::info!(width, height, buffers = STREAM_BUFFERS, "capturing YUYV");

        Ok(Self {
            stream: YuyvStream { buffers, width, height },
            path: path.to_string(),
        })
    }

    /// Throw away `count` frames while exposure settles.
    pub fn warm_up(&mut self, count: usize) -> Result<(), CameraError> {
        self.stream.warm_up(count)
    }

    /// Capture-capable V4L2 nodes on this machine.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|n| n.index());
        nodes
            .into_iter()
            .filter_map(|node| {
                let path = node.path().to_string_lossy().into_owned();
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

fn negotiate_yuyv(device: &Device) -> Result<(u32, u32), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::Format(format!("query: {e}")))?;
    fmt.fourcc = FourCC::new(YUYV);
    fmt.width = CAPTURE_WIDTH;
    fmt.height = CAPTURE_HEIGHT;

    let got = device
        .set_format(&fmt)
        .map_err(|e| CameraError::Format(format!("set: {e}")))?;
    if got.fourcc != FourCC::new(YUYV) {
        return Err(CameraError::Format(format!("driver offered {} instead of YUYV", got.fourcc)));
    }
    Ok((got.width, got.height))
}

impl FrameSource for Camera {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
        self.stream.grab().map(|(image, _)| image)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.path, "camera released");
    }
}
