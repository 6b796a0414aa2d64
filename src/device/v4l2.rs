//! V4L2 capture device.
//!
//! Opens a local device node (e.g. /dev/video0), enumerates its
//! format × frame-size combinations, and streams MJPG frames through an
//! mmap buffer queue. Only the `bytesused` part of each dequeued buffer is
//! returned; drivers leave stale data past it.

use std::io;
use std::time::Duration;

use ouroboros::self_referencing;
use v4l::buffer::{Flags, Type};
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use super::{CaptureDevice, CaptureFormat, FourCc};

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Device {
    path: String,
    idle: Option<v4l::Device>,
    streaming: Option<V4l2Stream>,
    timeout: Option<Duration>,
    frames_captured: u64,
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(device)]
    #[covariant]
    stream: MmapStream<'this>,
}

impl V4l2Device {
    pub fn open(path: &str) -> io::Result<Self> {
        let device = v4l::Device::with_path(path)?;
        log::info!("V4l2Device: opened {}", path);
        Ok(Self {
            path: path.to_string(),
            idle: Some(device),
            streaming: None,
            timeout: None,
            frames_captured: 0,
        })
    }

    fn idle_device(&self) -> io::Result<&v4l::Device> {
        self.idle
            .as_ref()
            .ok_or_else(|| io::Error::other(format!("{} is streaming", self.path)))
    }
}

impl CaptureDevice for V4l2Device {
    fn path(&self) -> &str {
        &self.path
    }

    fn formats(&mut self) -> io::Result<Vec<CaptureFormat>> {
        let device = self.idle_device()?;
        let mut formats = Vec::new();
        for description in device.enum_formats()? {
            let fourcc = FourCc(description.fourcc.repr);
            for size in device.enum_framesizes(description.fourcc)? {
                match size.size {
                    FrameSizeEnum::Discrete(discrete) => {
                        formats.push(CaptureFormat::new(
                            fourcc,
                            discrete.width,
                            discrete.height,
                        ));
                    }
                    // Only the bounds of a stepwise range are offered.
                    FrameSizeEnum::Stepwise(stepwise) => {
                        formats.push(CaptureFormat::new(
                            fourcc,
                            stepwise.min_width,
                            stepwise.min_height,
                        ));
                        formats.push(CaptureFormat::new(
                            fourcc,
                            stepwise.max_width,
                            stepwise.max_height,
                        ));
                    }
                }
            }
        }
        Ok(formats)
    }

    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<()> {
        let device = self.idle_device()?;
        let requested = v4l::Format::new(
            format.width,
            format.height,
            v4l::FourCC::new(&format.fourcc.0),
        );
        let applied = device.set_format(&requested)?;
        if applied.width != format.width
            || applied.height != format.height
            || applied.fourcc.repr != format.fourcc.0
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "driver on {} applied {} {}x{} instead of {}",
                    self.path,
                    FourCc(applied.fourcc.repr),
                    applied.width,
                    applied.height,
                    format
                ),
            ));
        }
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        let device = self
            .idle
            .take()
            .ok_or_else(|| io::Error::other(format!("{} is already streaming", self.path)))?;
        let timeout = self.timeout;
        let built = V4l2StreamTryBuilder {
            device,
            stream_builder: move |device| {
                let mut stream =
                    MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)?;
                if let Some(timeout) = timeout {
                    stream.set_timeout(timeout);
                }
                Ok(stream)
            },
        }
        .try_build_or_recover();
        let mut streaming = match built {
            Ok(streaming) => streaming,
            Err((err, heads)) => {
                self.idle = Some(heads.device);
                return Err(err);
            }
        };
        if let Err(err) = streaming.with_stream_mut(|stream| stream.start()) {
            self.idle = Some(streaming.into_heads().device);
            return Err(err);
        }
        self.streaming = Some(streaming);
        Ok(())
    }

    fn capture(&mut self) -> io::Result<Vec<u8>> {
        let streaming = self.streaming.as_mut().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not streaming", self.path),
            )
        })?;
        let frame = streaming.with_stream_mut(|stream| {
            let (buf, meta) = stream.next()?;
            // The driver flags buffers it could not fill completely.
            if meta.flags.contains(Flags::ERROR) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "driver marked frame {} as corrupt ({} bytes)",
                        meta.sequence, meta.bytesused
                    ),
                ));
            }
            let used = (meta.bytesused as usize).min(buf.len());
            Ok::<_, io::Error>(buf[..used].to_vec())
        })?;
        self.frames_captured += 1;
        Ok(frame)
    }

    fn set_capture_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn stop(&mut self) -> io::Result<()> {
        let Some(mut streaming) = self.streaming.take() else {
            return Ok(());
        };
        let result = streaming.with_stream_mut(|stream| stream.stop());
        // Dropping the stream unmaps the buffers; the device handle stays usable.
        let heads = streaming.into_heads();
        self.idle = Some(heads.device);
        log::info!(
            "V4l2Device: {} stopped after {} frames",
            self.path,
            self.frames_captured
        );
        result
    }
}
