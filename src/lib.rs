//! Multi-camera still capture and compositing.
//!
//! Each cycle grabs one still frame from every configured camera at the same
//! time, repairs and decodes the cameras' MJPG output, and copies the frames
//! onto one fixed-size canvas at per-camera offsets.
//!
//! # Architecture
//!
//! The pipeline holds three guarantees by construction:
//!
//! 1. **All or nothing**: a cycle yields a canvas only if every camera delivered
//!    a decodable frame. A composite with a missing panel is never emitted.
//! 2. **Deterministic order**: frames are composited in configured camera order,
//!    whatever order the captures complete in. Later cameras draw on top.
//! 3. **Every stream is stopped**: each session is stopped exactly once on
//!    shutdown, including after failed cycles or a signal before any cycle ran.
//!
//! # Module Structure
//!
//! - `config`: camera list, canvas layout, run settings
//! - `device`: driver seam (`CaptureDevice`), format negotiation, `DeviceSession`
//! - `decode`: MJPG bitstream repair and JPEG decode
//! - `capture`: concurrent fan-out across sessions
//! - `composite`: canvas allocation and frame placement
//! - `cycle`: the sequential cycle loop and shutdown
//! - `sink`: where finished canvases go

pub mod capture;
pub mod composite;
pub mod config;
pub mod cycle;
pub mod decode;
pub mod device;
pub mod error;
pub mod exit_codes;
pub mod sink;

pub use capture::capture_all;
pub use composite::{Canvas, Compositor, Placement};
pub use config::{CanvasConfig, DeviceConfig, MosaicConfig, RunSettings};
pub use cycle::{CycleDriver, DriverState, RunSummary};
pub use decode::{decode_frame, decode_jpeg, repair_mjpeg, DecodedFrame};
pub use device::{
    select_format, CaptureDevice, CaptureFormat, DeviceSession, FourCc, RawCapture,
    SessionState, SessionStats, StubDevice,
};
#[cfg(feature = "ingest-v4l2")]
pub use device::V4l2Device;
pub use error::{CompositeError, CycleError, DecodeError, SessionError};
pub use sink::{FileSink, FrameSink};
