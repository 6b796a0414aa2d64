//! Capture device sessions.
//!
//! A `DeviceSession` binds one `DeviceConfig` to one driver handle:
//! - Negotiates the MJPG format matching the configured size at open time
//! - Starts the capture stream once
//! - Hands out one complete encoded frame per `capture_once` call
//! - Stops the stream exactly once
//!
//! Drivers implement `CaptureDevice`. Two backends ship with the crate:
//! - `stub://` synthetic cameras (always available)
//! - V4L2 device nodes (feature: ingest-v4l2)

use std::fmt;
use std::io;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::error::SessionError;

pub mod stub;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use stub::StubDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Four-character pixel format code as reported by the driver.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const JPEG: FourCc = FourCc(*b"JPEG");
    pub const YUYV: FourCc = FourCc(*b"YUYV");

    /// Motion-JPEG stream. Some V4L2 stacks label the same stream `JPEG`.
    pub fn is_motion_jpeg(&self) -> bool {
        *self == Self::MJPG || *self == Self::JPEG
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
}

impl CaptureFormat {
    pub fn new(fourcc: FourCc, width: u32, height: u32) -> Self {
        Self {
            fourcc,
            width,
            height,
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.fourcc, self.width, self.height)
    }
}

/// Driver interface for one capture device.
///
/// `capture` blocks until one complete encoded frame is available.
pub trait CaptureDevice: Send {
    fn path(&self) -> &str;
    fn formats(&mut self) -> io::Result<Vec<CaptureFormat>>;
    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<()>;
    fn start(&mut self) -> io::Result<()>;
    fn capture(&mut self) -> io::Result<Vec<u8>>;
    fn stop(&mut self) -> io::Result<()>;

    /// Bound how long one `capture` may block before failing with
    /// `ErrorKind::TimedOut`. Takes effect from the next `start`.
    fn set_capture_timeout(&mut self, _timeout: Duration) {}
}

/// First motion-JPEG format with exactly the requested size, in driver order.
pub fn select_format(formats: &[CaptureFormat], width: u32, height: u32) -> Option<CaptureFormat> {
    formats
        .iter()
        .find(|format| {
            format.fourcc.is_motion_jpeg() && format.width == width && format.height == height
        })
        .copied()
}

/// One encoded frame exactly as the device returned it.
pub struct RawCapture {
    device: String,
    bytes: Vec<u8>,
}

impl RawCapture {
    pub fn new(device: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            device: device.into(),
            bytes,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Raw bytes stay out of logs.
impl fmt::Debug for RawCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCapture")
            .field("device", &self.device)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Format negotiated, stream not started.
    Configured,
    Streaming,
    Stopped,
}

impl SessionState {
    fn as_str(self) -> &'static str {
        match self {
            SessionState::Configured => "configured",
            SessionState::Streaming => "streaming",
            SessionState::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStats {
    pub device: String,
    pub frames_captured: u64,
    pub capture_failures: u64,
}

pub struct DeviceSession {
    config: DeviceConfig,
    device: Box<dyn CaptureDevice>,
    format: CaptureFormat,
    state: SessionState,
    frames_captured: u64,
    capture_failures: u64,
}

impl DeviceSession {
    /// Open the device named by `config`, picking the backend from its identifier.
    pub fn open(config: DeviceConfig) -> Result<Self, SessionError> {
        let device = open_backend(&config.device)?;
        Self::with_device(config, device)
    }

    /// Negotiate a format on an already-opened driver handle.
    pub fn with_device(
        config: DeviceConfig,
        mut device: Box<dyn CaptureDevice>,
    ) -> Result<Self, SessionError> {
        let formats = device.formats().map_err(|source| SessionError::Open {
            device: config.device.clone(),
            source,
        })?;
        log::debug!(
            "{}: {} capture formats available",
            config.device,
            formats.len()
        );

        let Some(format) = select_format(&formats, config.width, config.height) else {
            return Err(SessionError::NoMatchingFormat {
                config,
                available: formats,
            });
        };

        device
            .set_format(&format)
            .map_err(|source| SessionError::SetFormat {
                device: config.device.clone(),
                format,
                source,
            })?;
        log::info!("{}: negotiated {}", config.device, format);

        Ok(Self {
            config,
            device,
            format,
            state: SessionState::Configured,
            frames_captured: 0,
            capture_failures: 0,
        })
    }

    /// A stalled camera then fails its capture instead of holding the cycle,
    /// and with it shutdown, forever.
    pub fn set_capture_timeout(&mut self, timeout: Duration) {
        log::debug!(
            "{}: capture timeout {} ms",
            self.config.device,
            timeout.as_millis()
        );
        self.device.set_capture_timeout(timeout);
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Configured)?;
        self.device.start().map_err(|source| SessionError::Start {
            device: self.config.device.clone(),
            source,
        })?;
        self.state = SessionState::Streaming;
        log::info!("{}: capture stream started", self.config.device);
        Ok(())
    }

    /// Block until the device delivers one complete frame or reports failure.
    pub fn capture_once(&mut self) -> Result<RawCapture, SessionError> {
        self.expect_state(SessionState::Streaming)?;
        let bytes = match self.device.capture() {
            Ok(bytes) => bytes,
            Err(source) => {
                self.capture_failures += 1;
                return Err(SessionError::Capture {
                    device: self.config.device.clone(),
                    source,
                });
            }
        };
        if bytes.is_empty() {
            self.capture_failures += 1;
            return Err(SessionError::EmptyFrame {
                device: self.config.device.clone(),
            });
        }
        self.frames_captured += 1;
        Ok(RawCapture::new(self.config.device.clone(), bytes))
    }

    /// Stop the stream. The driver is asked at most once; a failed stop still
    /// leaves the session stopped.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let previous = self.state;
        self.state = SessionState::Stopped;
        match previous {
            SessionState::Streaming => {
                self.device.stop().map_err(|source| SessionError::Stop {
                    device: self.config.device.clone(),
                    source,
                })?;
                log::info!("{}: capture stream stopped", self.config.device);
                Ok(())
            }
            SessionState::Configured => {
                log::debug!("{}: never started, nothing to stop", self.config.device);
                Ok(())
            }
            SessionState::Stopped => Ok(()),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        &self.config.device
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            device: self.config.device.clone(),
            frames_captured: self.frames_captured,
            capture_failures: self.capture_failures,
        }
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                device: self.config.device.clone(),
                state: self.state.as_str(),
                expected: expected.as_str(),
            })
        }
    }
}

fn open_backend(path: &str) -> Result<Box<dyn CaptureDevice>, SessionError> {
    if path.starts_with(stub::STUB_SCHEME) {
        let device = StubDevice::open(path).map_err(|source| SessionError::Open {
            device: path.to_string(),
            source,
        })?;
        return Ok(Box::new(device));
    }
    open_device_node(path)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device_node(path: &str) -> Result<Box<dyn CaptureDevice>, SessionError> {
    let device = V4l2Device::open(path).map_err(|source| SessionError::Open {
        device: path.to_string(),
        source,
    })?;
    Ok(Box::new(device))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device_node(path: &str) -> Result<Box<dyn CaptureDevice>, SessionError> {
    Err(SessionError::Open {
        device: path.to_string(),
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "V4L2 support not compiled in; rebuild with --features ingest-v4l2",
        ),
    })
}
