//! Synthetic capture device for `stub://` identifiers.
//!
//! `stub://<name>[?color=RRGGBB&delay_ms=N&fail_every=N&corrupt_every=N&truncate_every=N]`
//!
//! The stub behaves like a cheap USB webcam: it advertises YUYV and MJPG at a
//! few fixed sizes and emits MJPG frames without Huffman tables, padded past
//! EOI. Frames are a solid color (derived from the name unless `color` is set).
//! `delay_ms` adds per-capture latency; `fail_every` / `corrupt_every` make every
//! Nth capture fail outright or return bytes that cannot be repaired, and
//! `truncate_every` returns a frame whose scan stops partway through. A capture
//! timeout shorter than `delay_ms` turns every capture into a timed-out one.

use std::io;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use super::{CaptureDevice, CaptureFormat, FourCc};
use crate::decode::parse_header;

pub(crate) const STUB_SCHEME: &str = "stub://";

const STUB_SIZES: [(u32, u32); 3] = [(320, 240), (640, 480), (1280, 720)];
const STUB_JPEG_QUALITY: u8 = 90;
const STUB_PADDING: usize = 16;

pub struct StubDevice {
    path: String,
    color: Rgb<u8>,
    delay: Duration,
    fail_every: u64,
    corrupt_every: u64,
    truncate_every: u64,
    timeout: Option<Duration>,
    format: Option<CaptureFormat>,
    streaming: bool,
    captures: u64,
}

impl StubDevice {
    pub fn open(path: &str) -> io::Result<Self> {
        let rest = path.strip_prefix(STUB_SCHEME).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a {} identifier", path, STUB_SCHEME),
            )
        })?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut device = Self {
            path: path.to_string(),
            color: color_for_name(name),
            delay: Duration::ZERO,
            fail_every: 0,
            corrupt_every: 0,
            truncate_every: 0,
            timeout: None,
            format: None,
            streaming: false,
            captures: 0,
        };

        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "color" => device.color = parse_rgb(value)?,
                "delay_ms" => device.delay = Duration::from_millis(parse_count(key, value)?),
                "fail_every" => device.fail_every = parse_count(key, value)?,
                "corrupt_every" => device.corrupt_every = parse_count(key, value)?,
                "truncate_every" => device.truncate_every = parse_count(key, value)?,
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("unknown stub option '{}' in {}", other, path),
                    ))
                }
            }
        }

        log::info!("StubDevice: opened {} (synthetic)", path);
        Ok(device)
    }

    pub fn color(&self) -> Rgb<u8> {
        self.color
    }

    fn nth(every: u64, count: u64) -> bool {
        every > 0 && count % every == 0
    }
}

impl CaptureDevice for StubDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn formats(&mut self) -> io::Result<Vec<CaptureFormat>> {
        let mut formats = Vec::with_capacity(STUB_SIZES.len() * 2);
        for fourcc in [FourCc::YUYV, FourCc::MJPG] {
            for (width, height) in STUB_SIZES {
                formats.push(CaptureFormat::new(fourcc, width, height));
            }
        }
        Ok(formats)
    }

    fn set_format(&mut self, format: &CaptureFormat) -> io::Result<()> {
        if !self.formats()?.contains(format) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} not supported by {}", format, self.path),
            ));
        }
        self.format = Some(*format);
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        if self.format.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "format must be set before streaming",
            ));
        }
        self.streaming = true;
        Ok(())
    }

    fn capture(&mut self) -> io::Result<Vec<u8>> {
        let format = match (self.streaming, self.format) {
            (true, Some(format)) => format,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "stub stream not started",
                ))
            }
        };
        self.captures += 1;
        if let Some(timeout) = self.timeout.filter(|timeout| *timeout < self.delay) {
            std::thread::sleep(timeout);
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no frame from {} within {} ms", self.path, timeout.as_millis()),
            ));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if Self::nth(self.fail_every, self.captures) {
            return Err(io::Error::other(format!(
                "synthetic capture failure #{}",
                self.captures
            )));
        }
        if Self::nth(self.corrupt_every, self.captures) {
            return Ok(vec![0x5A; 64]);
        }
        let frame = synthetic_frame(self.color, format.width, format.height)?;
        if Self::nth(self.truncate_every, self.captures) {
            return Ok(truncate_scan(&frame));
        }
        Ok(frame)
    }

    fn set_capture_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    fn stop(&mut self) -> io::Result<()> {
        self.streaming = false;
        Ok(())
    }
}

/// Solid-color frame shaped like webcam MJPG output: no DHT, padded past EOI.
pub fn synthetic_frame(color: Rgb<u8>, width: u32, height: u32) -> io::Result<Vec<u8>> {
    let jpeg = encode_jpeg(color, width, height)?;
    let mut frame = strip_huffman_tables(&jpeg)?;
    frame.extend_from_slice(&[0u8; STUB_PADDING]);
    Ok(frame)
}

/// Solid-color baseline JPEG with standard tables.
pub fn encode_jpeg(color: Rgb<u8>, width: u32, height: u32) -> io::Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, color);
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, STUB_JPEG_QUALITY)
        .encode_image(&image)
        .map_err(io::Error::other)?;
    Ok(out)
}

fn strip_huffman_tables(jpeg: &[u8]) -> io::Result<Vec<u8>> {
    let header = parse_header(jpeg).map_err(io::Error::other)?;
    let mut out = Vec::with_capacity(jpeg.len());
    out.extend_from_slice(&jpeg[..2]);
    for segment in header.segments.iter().filter(|s| s.marker != 0xC4) {
        out.extend_from_slice(&jpeg[segment.start..segment.end]);
    }
    out.extend_from_slice(&jpeg[header.scan.start..]);
    Ok(out)
}

// Half the scan, then zero fill where the rest of the buffer would have been.
fn truncate_scan(frame: &[u8]) -> Vec<u8> {
    let scan_end = parse_header(frame).map_or(frame.len() / 2, |header| header.scan.end);
    let keep = scan_end + (frame.len() - scan_end) / 2;
    let mut cut = frame[..keep].to_vec();
    cut.resize(frame.len(), 0);
    cut
}

// FNV-1a so each stub name gets a stable, distinct color.
fn color_for_name(name: &str) -> Rgb<u8> {
    let hash = name
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    Rgb([(hash >> 16) as u8, (hash >> 8) as u8, hash as u8])
}

fn parse_rgb(value: &str) -> io::Result<Rgb<u8>> {
    let hex = value.trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("stub color '{}' must be RRGGBB hex", value),
        ));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(io::Error::other);
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

fn parse_count(key: &str, value: &str) -> io::Result<u64> {
    value.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("stub option {} must be an integer, got '{}'", key, value),
        )
    })
}
