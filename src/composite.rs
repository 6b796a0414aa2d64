//! Canvas assembly.
//!
//! Every cycle starts from a fresh canvas filled with the background color.
//! Frames are copied in device order with no blending or scaling, so a later
//! camera overwrites an earlier one wherever their placements overlap. Pixels
//! that land outside the canvas are clipped.

use image::{imageops, Rgba, RgbaImage};

use crate::config::{CanvasConfig, DeviceConfig};
use crate::decode::DecodedFrame;
use crate::error::CompositeError;

/// Where a camera's frame lands on the canvas, plus the size it should have.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub device: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<&DeviceConfig> for Placement {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            device: config.device.clone(),
            x: config.target_x,
            y: config.target_y,
            width: config.width,
            height: config.height,
        }
    }
}

/// A finished composite image for one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn blank(width: u32, height: u32, background: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, background),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    fn blit(&mut self, frame: &RgbaImage, x: u32, y: u32) {
        imageops::replace(&mut self.image, frame, i64::from(x), i64::from(y));
    }
}

#[derive(Clone, Debug)]
pub struct Compositor {
    width: u32,
    height: u32,
    background: Rgba<u8>,
    placements: Vec<Placement>,
}

impl Compositor {
    pub fn new(canvas: CanvasConfig, cameras: &[DeviceConfig]) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            background: canvas.background,
            placements: cameras.iter().map(Placement::from).collect(),
        }
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn blank_canvas(&self) -> Canvas {
        Canvas::blank(self.width, self.height, self.background)
    }

    /// Copy `frames[i]` to `placements[i]` for every camera, in order.
    pub fn composite(&self, frames: &[DecodedFrame]) -> Result<Canvas, CompositeError> {
        if frames.len() != self.placements.len() {
            return Err(CompositeError::FrameCountMismatch {
                expected: self.placements.len(),
                actual: frames.len(),
            });
        }

        let mut canvas = self.blank_canvas();
        for (frame, placement) in frames.iter().zip(&self.placements) {
            if (frame.width(), frame.height()) != (placement.width, placement.height) {
                log::warn!(
                    "{}: decoded {}x{} frame, expected {}x{}; placing as-is",
                    placement.device,
                    frame.width(),
                    frame.height(),
                    placement.width,
                    placement.height
                );
            }
            canvas.blit(frame.image(), placement.x, placement.y);
        }
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(device: &str, width: u32, height: u32, x: u32, y: u32) -> DeviceConfig {
        DeviceConfig {
            device: device.to_string(),
            width,
            height,
            target_x: x,
            target_y: y,
        }
    }

    fn solid(device: &str, width: u32, height: u32, color: [u8; 4]) -> DecodedFrame {
        DecodedFrame::new(device, RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    fn canvas_config(width: u32, height: u32) -> CanvasConfig {
        CanvasConfig {
            width,
            height,
            background: Rgba([0, 0, 0, 255]),
        }
    }

    #[test]
    fn side_by_side_halves() -> Result<(), CompositeError> {
        let compositor = Compositor::new(
            canvas_config(640, 240),
            &[camera("a", 320, 240, 0, 0), camera("b", 320, 240, 320, 0)],
        );
        let canvas = compositor.composite(&[
            solid("a", 320, 240, [255, 0, 0, 255]),
            solid("b", 320, 240, [0, 0, 255, 255]),
        ])?;

        assert_eq!((canvas.width(), canvas.height()), (640, 240));
        for (x, _, pixel) in canvas.image().enumerate_pixels() {
            let expected = if x < 320 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            };
            assert_eq!(*pixel, expected);
        }
        Ok(())
    }

    #[test]
    fn uncovered_area_keeps_background() -> Result<(), CompositeError> {
        let compositor = Compositor::new(
            CanvasConfig {
                width: 8,
                height: 8,
                background: Rgba([10, 20, 30, 255]),
            },
            &[camera("a", 2, 2, 3, 3)],
        );
        let canvas = compositor.composite(&[solid("a", 2, 2, [200, 200, 200, 255])])?;
        assert_eq!(*canvas.image().get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*canvas.image().get_pixel(3, 3), Rgba([200, 200, 200, 255]));
        assert_eq!(*canvas.image().get_pixel(4, 4), Rgba([200, 200, 200, 255]));
        assert_eq!(*canvas.image().get_pixel(5, 5), Rgba([10, 20, 30, 255]));
        Ok(())
    }

    #[test]
    fn later_device_wins_overlap() -> Result<(), CompositeError> {
        let compositor = Compositor::new(
            canvas_config(6, 4),
            &[camera("a", 4, 4, 0, 0), camera("b", 4, 4, 2, 0)],
        );
        let canvas = compositor.composite(&[
            solid("a", 4, 4, [1, 1, 1, 255]),
            solid("b", 4, 4, [2, 2, 2, 255]),
        ])?;
        assert_eq!(*canvas.image().get_pixel(1, 0), Rgba([1, 1, 1, 255]));
        assert_eq!(*canvas.image().get_pixel(2, 0), Rgba([2, 2, 2, 255]));
        assert_eq!(*canvas.image().get_pixel(3, 3), Rgba([2, 2, 2, 255]));
        Ok(())
    }

    #[test]
    fn copy_is_pixel_exact_without_blending() -> Result<(), CompositeError> {
        let mut pattern = RgbaImage::new(3, 2);
        for (x, y, pixel) in pattern.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8 * 40, y as u8 * 90, 7, 128]);
        }
        let compositor = Compositor::new(canvas_config(5, 5), &[camera("a", 3, 2, 1, 2)]);
        let canvas = compositor.composite(&[DecodedFrame::new("a", pattern.clone())])?;
        for (x, y, pixel) in pattern.enumerate_pixels() {
            assert_eq!(canvas.image().get_pixel(x + 1, y + 2), pixel);
        }
        Ok(())
    }

    #[test]
    fn clips_frames_past_the_edge() -> Result<(), CompositeError> {
        let compositor = Compositor::new(canvas_config(4, 4), &[camera("a", 4, 4, 2, 2)]);
        let canvas = compositor.composite(&[solid("a", 4, 4, [9, 9, 9, 255])])?;
        assert_eq!((canvas.width(), canvas.height()), (4, 4));
        assert_eq!(*canvas.image().get_pixel(3, 3), Rgba([9, 9, 9, 255]));
        assert_eq!(*canvas.image().get_pixel(1, 1), Rgba([0, 0, 0, 255]));
        Ok(())
    }

    #[test]
    fn rejects_wrong_frame_count() {
        let compositor = Compositor::new(
            canvas_config(4, 4),
            &[camera("a", 2, 2, 0, 0), camera("b", 2, 2, 2, 0)],
        );
        let err = compositor
            .composite(&[solid("a", 2, 2, [0, 0, 0, 255])])
            .unwrap_err();
        assert!(matches!(
            err,
            CompositeError::FrameCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
