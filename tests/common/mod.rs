//! Scripted capture devices for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, Rgba};
use mosaic_capture::device::stub::synthetic_frame;
use mosaic_capture::{
    CanvasConfig, CaptureDevice, CaptureFormat, DeviceConfig, DeviceSession, FourCc,
};

#[derive(Default, Debug)]
pub struct Counters {
    pub starts: AtomicUsize,
    pub captures: AtomicUsize,
    pub stops: AtomicUsize,
}

impl Counters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Driver double that emits solid-color MJPG frames and records every call.
pub struct ScriptedDevice {
    path: String,
    color: Rgb<u8>,
    formats: Vec<CaptureFormat>,
    format: Option<CaptureFormat>,
    delay: Duration,
    timeout: Option<Duration>,
    fail_capture: bool,
    fail_start: bool,
    fail_stop: bool,
    counters: Arc<Counters>,
}

impl ScriptedDevice {
    pub fn new(path: &str, color: Rgb<u8>) -> Self {
        Self {
            path: path.to_string(),
            color,
            formats: vec![
                CaptureFormat::new(FourCc::YUYV, 320, 240),
                CaptureFormat::new(FourCc::MJPG, 320, 240),
                CaptureFormat::new(FourCc::MJPG, 640, 480),
            ],
            format: None,
            delay: Duration::ZERO,
            timeout: None,
            fail_capture: false,
            fail_start: false,
            fail_stop: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_formats(mut self, formats: Vec<CaptureFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing_capture(mut self) -> Self {
        self.fail_capture = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

impl CaptureDevice for ScriptedDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn formats(&mut self) -> io::Result<Vec<CaptureFormat>> {
        Ok(self.formats.clone())
    }

    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<()> {
        self.format = Some(*format);
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(io::Error::other("scripted start failure"));
        }
        Ok(())
    }

    fn capture(&mut self) -> io::Result<Vec<u8>> {
        self.counters.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(timeout) = self.timeout.filter(|timeout| *timeout < self.delay) {
            std::thread::sleep(timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted stall"));
        }
        std::thread::sleep(self.delay);
        if self.fail_capture {
            return Err(io::Error::other("scripted capture failure"));
        }
        let format = self
            .format
            .ok_or_else(|| io::Error::other("format not negotiated"))?;
        synthetic_frame(self.color, format.width, format.height)
    }

    fn set_capture_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn stop(&mut self) -> io::Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(io::Error::other("scripted stop failure"));
        }
        Ok(())
    }
}

pub fn camera(device: &str, width: u32, height: u32, x: u32, y: u32) -> DeviceConfig {
    DeviceConfig {
        device: device.to_string(),
        width,
        height,
        target_x: x,
        target_y: y,
    }
}

pub fn black_canvas(width: u32, height: u32) -> CanvasConfig {
    CanvasConfig {
        width,
        height,
        background: Rgba([0, 0, 0, 255]),
    }
}

/// Negotiate a session over a scripted device, keeping its counters.
pub fn session(config: &DeviceConfig, device: ScriptedDevice) -> (DeviceSession, Arc<Counters>) {
    let counters = device.counters();
    let session = DeviceSession::with_device(config.clone(), Box::new(device))
        .expect("scripted device negotiates");
    (session, counters)
}
