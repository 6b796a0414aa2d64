//! Output sinks for finished composites.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::composite::Canvas;

/// Receives one finished canvas per successful cycle.
pub trait FrameSink {
    fn write(&mut self, cycle: u64, canvas: Canvas) -> Result<()>;
}

impl<F> FrameSink for F
where
    F: FnMut(u64, Canvas) -> Result<()>,
{
    fn write(&mut self, cycle: u64, canvas: Canvas) -> Result<()> {
        self(cycle, canvas)
    }
}

/// Writes `<dir>/<prefix>-<cycle>.jpg`.
#[derive(Clone, Debug)]
pub struct FileSink {
    dir: PathBuf,
    prefix: String,
    quality: u8,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            quality,
        }
    }

    pub fn path_for(&self, cycle: u64) -> PathBuf {
        self.dir.join(format!("{}-{}.jpg", self.prefix, cycle))
    }

    fn encode(&self, canvas: Canvas, path: &Path) -> Result<()> {
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgba8(canvas.into_image()).into_rgb8();
        let file =
            File::create(path).with_context(|| format!("create output file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(&rgb)
            .with_context(|| format!("encode composite {}", path.display()))?;
        Ok(())
    }
}

impl FrameSink for FileSink {
    fn write(&mut self, cycle: u64, canvas: Canvas) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create output directory {}", self.dir.display()))?;
        let path = self.path_for(cycle);
        self.encode(canvas, &path)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}
