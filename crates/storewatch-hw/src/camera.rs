//! Shop-floor camera over V4L2.

use crate::frame::{self, Frame, PixelFormat, DARK_FRAME_THRESHOLD};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

/// Mapped buffers per capture stream.
const STREAM_BUFFERS: u32 = 4;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("{0} is in use by another process")]
    Busy(String),
    #[error("{0} cannot capture video")]
    NotACaptureDevice(String),
    #[error("no usable pixel format on {device}: {detail}")]
    Format { device: String, detail: String },
    #[error("capture failed: {0}")]
    Capture(String),
}

/// A V4L2 device that can capture video.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// An open camera with a negotiated size and pixel format.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and ask for `width`×`height`. Formats are tried in
    /// [`PixelFormat::PREFERRED`] order; the driver's chosen size is kept even
    /// when it differs from the request.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::NotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(EBUSY) => CameraError::Busy(device_path.to_string()),
            _ => CameraError::NotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::Capture(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotACaptureDevice(device_path.to_string()));
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let (negotiated, pixel_format) = negotiate(&device, device_path, width, height)?;
        if (negotiated.width, negotiated.height) != (width, height) {
            tracing::warn!(
                requested = %format!("{width}x{height}"),
                actual = %format!("{}x{}", negotiated.width, negotiated.height),
                "driver adjusted frame size"
            );
        }

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Grab one frame as grayscale, flagged dark when mostly black.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Capture(format!("dequeue buffer: {e}")))?;

        let data = self
            .pixel_format
            .to_grayscale(buf, self.width, self.height)
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        let is_dark = frame::is_dark_frame(&data, DARK_FRAME_THRESHOLD);

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }

    /// Read and drop `count` frames so auto-exposure can settle.
    pub fn discard_frames(&self, count: usize) -> Result<(), CameraError> {
        if count == 0 {
            return Ok(());
        }
        let mut stream = self.stream()?;
        for _ in 0..count {
            stream
                .next()
                .map_err(|e| CameraError::Capture(format!("dequeue buffer: {e}")))?;
        }
        Ok(())
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::Capture(format!("start mmap stream: {e}")))
    }

    /// Capture-capable `/dev/video*` nodes, in numeric order.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };

        let mut nodes: Vec<(u32, String)> = entries
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let index = name.strip_prefix("video")?.parse().ok()?;
                Some((index, format!("/dev/{name}")))
            })
            .collect();
        nodes.sort();

        nodes
            .into_iter()
            .filter_map(|(_, path)| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities.contains(Flags::VIDEO_CAPTURE).then(|| DeviceInfo {
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                    bus: caps.bus.clone(),
                    path,
                })
            })
            .collect()
    }
}

/// Try each preferred format and keep the first one the driver accepts.
fn negotiate(
    device: &Device,
    device_path: &str,
    width: u32,
    height: u32,
) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let format_err = |detail: String| CameraError::Format {
        device: device_path.to_string(),
        detail,
    };

    let mut fmt = device
        .format()
        .map_err(|e| format_err(format!("read current format: {e}")))?;
    fmt.width = width;
    fmt.height = height;

    let mut offered = Vec::new();
    for wanted in PixelFormat::PREFERRED {
        fmt.fourcc = wanted.fourcc();
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| format_err(format!("set format: {e}")))?;
        match PixelFormat::from_fourcc(negotiated.fourcc) {
            Some(pf) => {
                tracing::info!(
                    width = negotiated.width,
                    height = negotiated.height,
                    fourcc = ?negotiated.fourcc,
                    "negotiated format"
                );
                return Ok((negotiated, pf));
            }
            None => offered.push(format!("{:?}", negotiated.fourcc)),
        }
    }

    Err(format_err(format!(
        "driver offered {} (need YUYV, GREY or Y16)",
        offered.join(", ")
    )))
}
