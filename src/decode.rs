//! Frame decoding.
//!
//! Webcam MJPG frames are not conformant still JPEG: most devices omit the
//! Huffman tables (the decoder is expected to assume the ITU-T T.81 Annex K
//! defaults) and pad the buffer past EOI. Every frame therefore goes through two
//! stages, in order:
//! 1. `repair_mjpeg`: rebuild a strict JPEG bitstream
//! 2. `decode_jpeg`: decode the strict bitstream into RGBA8
//!
//! Both are pure functions over bytes so they can be exercised without a device.

use image::{ImageFormat, RgbaImage};

use crate::device::RawCapture;
use crate::error::DecodeError;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DHT: u8 = 0xC4;
const TEM: u8 = 0x01;

const LUMA_DC_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const LUMA_DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const CHROMA_DC_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const CHROMA_DC_VALUES: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const LUMA_AC_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
#[rustfmt::skip]
const LUMA_AC_VALUES: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07,
    0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08, 0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52, 0xd1, 0xf0,
    0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x25, 0x26, 0x27, 0x28,
    0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
    0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
    0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89,
    0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
    0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5,
    0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2,
    0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

const CHROMA_AC_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
#[rustfmt::skip]
const CHROMA_AC_VALUES: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61, 0x71,
    0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33, 0x52, 0xf0,
    0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34, 0xe1, 0x25, 0xf1, 0x17, 0x18, 0x19, 0x1a, 0x26,
    0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87,
    0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5,
    0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3,
    0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda,
    0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

/// One camera's decoded frame for the current cycle.
pub struct DecodedFrame {
    device: String,
    image: RgbaImage,
}

impl DecodedFrame {
    pub fn new(device: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            device: device.into(),
            image,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Repair then decode one raw capture.
pub fn decode_frame(raw: &RawCapture) -> Result<DecodedFrame, DecodeError> {
    let jpeg = repair_mjpeg(raw.as_bytes())?;
    let image = decode_jpeg(&jpeg)?;
    Ok(DecodedFrame::new(raw.device(), image))
}

/// Decode a strict JPEG bitstream into RGBA8.
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(image.into_rgba8())
}

/// Rebuild a strict JPEG bitstream from a device MJPG frame.
///
/// Drops bytes before SOI and after the first EOI and inserts the default
/// Huffman tables when the header has none. A frame whose scan never reaches
/// EOI is rejected: it cannot be told apart from a buffer the device cut short.
/// A conformant JPEG comes back unchanged.
pub fn repair_mjpeg(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let soi = raw
        .windows(2)
        .position(|w| w == [0xFF, SOI])
        .ok_or(DecodeError::MissingSoi)?;
    let data = &raw[soi..];
    let header = parse_header(data)?;

    let entropy = &data[header.scan.end..];
    let eoi = find_eoi(entropy).ok_or(DecodeError::MissingEoi {
        scan_bytes: entropy.len(),
    })?;
    let has_tables = header.segments.iter().any(|s| s.marker == DHT);

    let mut out = Vec::with_capacity(data.len() + 512);
    out.extend_from_slice(&[0xFF, SOI]);
    for segment in &header.segments {
        out.extend_from_slice(&data[segment.start..segment.end]);
    }
    if !has_tables {
        write_default_huffman_tables(&mut out);
    }
    out.extend_from_slice(&data[header.scan.start..header.scan.end]);
    out.extend_from_slice(&entropy[..eoi + 2]);
    Ok(out)
}

/// A marker segment; `start` is the 0xFF of the marker, `end` is exclusive.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Segment {
    pub(crate) marker: u8,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Segments between SOI and the first scan, plus the SOS header itself.
pub(crate) struct Header {
    pub(crate) segments: Vec<Segment>,
    pub(crate) scan: Segment,
}

/// Walk marker segments of `data`, which must start with SOI.
pub(crate) fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    if !data.starts_with(&[0xFF, SOI]) {
        return Err(DecodeError::MissingSoi);
    }
    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        let Some(&byte) = data.get(pos) else {
            return Err(DecodeError::MissingScan);
        };
        if byte != 0xFF {
            return Err(DecodeError::InvalidMarker {
                offset: pos,
                found: byte,
            });
        }
        // Any number of 0xFF fill bytes may precede a marker.
        while data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let Some(&marker) = data.get(pos + 1) else {
            return Err(DecodeError::MissingScan);
        };

        match marker {
            EOI => return Err(DecodeError::MissingScan),
            0x00 | SOI => {
                return Err(DecodeError::InvalidMarker {
                    offset: pos + 1,
                    found: marker,
                })
            }
            TEM | 0xD0..=0xD7 => {
                segments.push(Segment {
                    marker,
                    start: pos,
                    end: pos + 2,
                });
                pos += 2;
            }
            _ => {
                let Some(len_bytes) = data.get(pos + 2..pos + 4) else {
                    return Err(DecodeError::Truncated { offset: pos });
                };
                let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
                let end = pos + 2 + len;
                if len < 2 || end > data.len() {
                    return Err(DecodeError::Truncated { offset: pos });
                }
                let segment = Segment {
                    marker,
                    start: pos,
                    end,
                };
                if marker == SOS {
                    return Ok(Header {
                        segments,
                        scan: segment,
                    });
                }
                segments.push(segment);
                pos = end;
            }
        }
    }
}

// Entropy-coded data stuffs every 0xFF data byte as FF 00, so FF D9 is only EOI.
fn find_eoi(entropy: &[u8]) -> Option<usize> {
    entropy.windows(2).position(|w| w == [0xFF, EOI])
}

fn write_default_huffman_tables(out: &mut Vec<u8>) {
    let tables: [(u8, &[u8; 16], &[u8]); 4] = [
        (0x00, &LUMA_DC_BITS, &LUMA_DC_VALUES),
        (0x10, &LUMA_AC_BITS, &LUMA_AC_VALUES),
        (0x01, &CHROMA_DC_BITS, &CHROMA_DC_VALUES),
        (0x11, &CHROMA_AC_BITS, &CHROMA_AC_VALUES),
    ];
    let len = 2 + tables
        .iter()
        .map(|(_, bits, values)| 1 + bits.len() + values.len())
        .sum::<usize>();

    out.extend_from_slice(&[0xFF, DHT]);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    for (class_and_id, bits, values) in tables {
        out.push(class_and_id);
        out.extend_from_slice(bits);
        out.extend_from_slice(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::stub::{encode_jpeg, synthetic_frame};
    use anyhow::Result;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    fn count_tables(jpeg: &[u8]) -> Result<usize> {
        let header = parse_header(jpeg)?;
        Ok(header.segments.iter().filter(|s| s.marker == DHT).count())
    }

    #[test]
    fn default_tables_match_annex_k_sizes() {
        let bit_total = |bits: &[u8; 16]| bits.iter().map(|&b| usize::from(b)).sum::<usize>();
        assert_eq!(bit_total(&LUMA_DC_BITS), LUMA_DC_VALUES.len());
        assert_eq!(bit_total(&CHROMA_DC_BITS), CHROMA_DC_VALUES.len());
        assert_eq!(bit_total(&LUMA_AC_BITS), LUMA_AC_VALUES.len());
        assert_eq!(bit_total(&CHROMA_AC_BITS), CHROMA_AC_VALUES.len());

        let mut out = Vec::new();
        write_default_huffman_tables(&mut out);
        assert_eq!(&out[..4], &[0xFF, DHT, 0x01, 0xA2]);
        assert_eq!(out.len(), 2 + 0x01A2);
    }

    #[test]
    fn conformant_jpeg_passes_through_unchanged() -> Result<()> {
        let jpeg = encode_jpeg(Rgb([10, 200, 30]), 32, 16)?;
        assert_eq!(repair_mjpeg(&jpeg)?, jpeg);
        Ok(())
    }

    #[test]
    fn inserts_tables_into_device_frame() -> Result<()> {
        let frame = synthetic_frame(Rgb([200, 40, 40]), 64, 48)?;
        assert_eq!(count_tables(&frame)?, 0);

        let repaired = repair_mjpeg(&frame)?;
        assert_eq!(count_tables(&repaired)?, 1);
        assert!(repaired.ends_with(&[0xFF, EOI]));

        let image = decode_jpeg(&repaired)?;
        assert_eq!(image.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn repaired_frame_decodes_like_the_source_image() -> Result<()> {
        let color = Rgb([90, 160, 220]);
        let reference = decode_jpeg(&encode_jpeg(color, 48, 32)?)?;
        let repaired = repair_mjpeg(&synthetic_frame(color, 48, 32)?)?;
        assert_eq!(decode_jpeg(&repaired)?, reference);
        Ok(())
    }

    #[test]
    fn trims_bytes_outside_soi_and_eoi() -> Result<()> {
        let jpeg = encode_jpeg(Rgb([0, 0, 255]), 16, 16)?;
        let mut raw = vec![0x00, 0x11, 0x22];
        raw.extend_from_slice(&jpeg);
        raw.extend_from_slice(&[0u8; 32]);
        assert_eq!(repair_mjpeg(&raw)?, jpeg);
        Ok(())
    }

    #[test]
    fn frame_without_eoi_is_rejected() -> Result<()> {
        let jpeg = encode_jpeg(Rgb([255, 255, 0]), 16, 16)?;
        let cut = &jpeg[..jpeg.len() - 2];
        assert!(matches!(
            repair_mjpeg(cut),
            Err(DecodeError::MissingEoi { .. })
        ));
        Ok(())
    }

    #[test]
    fn scan_cut_short_is_not_decoded() -> Result<()> {
        let gradient = RgbImage::from_fn(320, 240, |x, y| {
            Rgb([(x * 255 / 319) as u8, (y * 255 / 239) as u8, 136])
        });
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90).encode_image(&gradient)?;
        let scan_start = parse_header(&jpeg)?.scan.end;
        let entropy_len = jpeg.len() - scan_start;

        // Keep a third of the scan, then the padding a device leaves behind.
        let mut cut = jpeg[..scan_start + entropy_len / 3].to_vec();
        cut.extend_from_slice(&[0u8; 64]);
        match repair_mjpeg(&cut) {
            Err(DecodeError::MissingEoi { scan_bytes }) => {
                assert_eq!(scan_bytes, entropy_len / 3 + 64)
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("a cut scan must not be repaired into a full frame"),
        }

        let raw = RawCapture::new("stub://cut", cut);
        assert!(decode_frame(&raw).is_err());
        Ok(())
    }

    #[test]
    fn rejects_unrepairable_frames() {
        assert!(matches!(
            repair_mjpeg(&[0x00; 64]),
            Err(DecodeError::MissingSoi)
        ));
        assert!(matches!(
            repair_mjpeg(&[0xFF, SOI]),
            Err(DecodeError::MissingScan)
        ));
        assert!(matches!(
            repair_mjpeg(&[0xFF, SOI, 0x12, 0x34]),
            Err(DecodeError::InvalidMarker { offset: 2, found: 0x12 })
        ));
        assert!(matches!(
            repair_mjpeg(&[0xFF, SOI, 0xFF, 0xE0, 0x00, 0x10, 0x4A]),
            Err(DecodeError::Truncated { offset: 2 })
        ));
        assert!(matches!(
            repair_mjpeg(&[0xFF, SOI, 0xFF, EOI]),
            Err(DecodeError::MissingScan)
        ));
    }

    #[test]
    fn garbage_after_repair_is_a_decode_error() {
        assert!(matches!(
            decode_jpeg(b"definitely not a jpeg"),
            Err(DecodeError::Image(_))
        ));
    }

    #[test]
    fn decode_frame_keeps_device_identity() -> Result<()> {
        let raw = RawCapture::new("stub://left", synthetic_frame(Rgb([1, 2, 3]), 16, 8)?);
        let frame = decode_frame(&raw)?;
        assert_eq!(frame.device(), "stub://left");
        assert_eq!((frame.width(), frame.height()), (16, 8));
        Ok(())
    }
}
