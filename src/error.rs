//! Error taxonomy for the capture pipeline.
//!
//! - `SessionError`: device lifecycle and capture failures. `NoMatchingFormat` is
//!   fatal at startup; everything raised by `capture_once` is per-cycle.
//! - `DecodeError`: MJPEG repair or JPEG decode failures (per-cycle).
//! - `CompositeError`: frame set does not fit the configured layout.
//! - `CycleError`: the single failure a cycle escalates to.

use std::io;

use thiserror::Error;

use crate::config::DeviceConfig;
use crate::device::CaptureFormat;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open capture device {device}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "no MJPG capture format matching {}x{} on device {}",
        .config.width,
        .config.height,
        .config.device
    )]
    NoMatchingFormat {
        config: DeviceConfig,
        available: Vec<CaptureFormat>,
    },

    #[error("failed to set format {format} on device {device}")]
    SetFormat {
        device: String,
        format: CaptureFormat,
        #[source]
        source: io::Error,
    },

    #[error("device {device} is {state}, expected {expected}")]
    InvalidState {
        device: String,
        state: &'static str,
        expected: &'static str,
    },

    #[error("failed to start capture stream on {device}")]
    Start {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("capture failed on {device}")]
    Capture {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("device {device} returned an empty frame")]
    EmptyFrame { device: String },

    #[error("failed to stop capture stream on {device}")]
    Stop {
        device: String,
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    /// True for the startup error that maps to `exit_codes::NO_MATCHING_FORMAT`.
    pub fn is_no_matching_format(&self) -> bool {
        matches!(self, SessionError::NoMatchingFormat { .. })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no JPEG start-of-image marker in frame")]
    MissingSoi,

    #[error("frame truncated inside marker segment at offset {offset}")]
    Truncated { offset: usize },

    #[error("expected marker at offset {offset}, found byte 0x{found:02x}")]
    InvalidMarker { offset: usize, found: u8 },

    #[error("frame has no start-of-scan segment")]
    MissingScan,

    #[error("scan ends after {scan_bytes} bytes without an end-of-image marker")]
    MissingEoi { scan_bytes: usize },

    #[error("repaired frame failed to decode")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("expected {expected} frames for the layout, got {actual}")]
    FrameCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("capture failed for device #{index} ({device})")]
    Capture {
        index: usize,
        device: String,
        #[source]
        source: SessionError,
    },

    #[error("decode failed for device #{index} ({device})")]
    Decode {
        index: usize,
        device: String,
        #[source]
        source: DecodeError,
    },

    #[error("capture worker for device #{index} ({device}) panicked")]
    WorkerPanicked { index: usize, device: String },

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

impl CycleError {
    /// Index of the device that failed, if the failure is device-specific.
    pub fn device_index(&self) -> Option<usize> {
        match self {
            CycleError::Capture { index, .. }
            | CycleError::Decode { index, .. }
            | CycleError::WorkerPanicked { index, .. } => Some(*index),
            CycleError::Composite(_) => None,
        }
    }
}
