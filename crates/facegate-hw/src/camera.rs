//! V4L2 camera capture via the `v4l` crate.

use std::path::Path;

use facegate_core::{Frame, ImageSource};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    CaptureNotSupported,
}

/// Negotiated pixel format, always reduced to 8-bit grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; the Y channel is kept.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale; the high byte is kept.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        if fourcc == FourCC::new(b"YUYV") {
            Some(PixelFormat::Yuyv)
        } else if fourcc == FourCC::new(b"GREY") {
            Some(PixelFormat::Grey)
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            Some(PixelFormat::Y16)
        } else {
            None
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

/// Reduce one raw buffer to `width * height` grayscale bytes.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(CameraError::CaptureFailed(format!(
            "{format:?} buffer too short: expected {expected}, got {}",
            buf.len()
        )));
    }

    let gray = match format {
        PixelFormat::Grey => buf[..pixels].to_vec(),
        PixelFormat::Yuyv => buf[..expected].iter().step_by(2).copied().collect(),
        PixelFormat::Y16 => buf[..expected].chunks_exact(2).map(|px| px[1]).collect(),
    };
    Ok(gray)
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and negotiate `width`x`height`, preferring YUYV
    /// but accepting GREY or Y16 if the driver insists.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }
        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Capture one grayscale frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        Ok(Frame {
            data: to_grayscale(self.pixel_format, buf, self.width, self.height)?,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }
}

/// [`ImageSource`] over a [`Camera`] that never fails.
///
/// A failed capture repeats the last good frame, or a blank frame before the
/// first success. The failure is logged once per run of consecutive errors.
pub struct CameraSource {
    camera: Camera,
    last_good: Option<Frame>,
    failing: bool,
}

impl CameraSource {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            last_good: None,
            failing: false,
        }
    }
}

impl ImageSource for CameraSource {
    fn capture(&mut self) -> Frame {
        match self.camera.capture_frame() {
            Ok(frame) => {
                if self.failing {
                    tracing::info!(device = %self.camera.device_path, "camera capture recovered");
                    self.failing = false;
                }
                self.last_good = Some(frame.clone());
                frame
            }
            Err(e) => {
                if !self.failing {
                    tracing::warn!(device = %self.camera.device_path, error = %e, "camera capture failed, repeating last frame");
                    self.failing = true;
                }
                self.last_good
                    .clone()
                    .unwrap_or_else(|| Frame::blank(self.camera.width, self.camera.height))
            }
        }
    }
}
