use anyhow::{anyhow, Result};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_FILE_PREFIX: &str = "composite";
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Deserialize, Default)]
struct MosaicConfigFile {
    output: Option<OutputConfigFile>,
    #[serde(rename = "outputWidth")]
    output_width: Option<u32>,
    #[serde(rename = "outputHeight")]
    output_height: Option<u32>,
    #[serde(default)]
    cameras: Vec<DeviceConfig>,
    run: Option<RunConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    background: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    cycles: Option<u64>,
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    jpeg_quality: Option<u8>,
    capture_timeout_ms: Option<u64>,
}

/// One physical camera: where to open it, what to ask for, where to draw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device node (`/dev/video0`) or `stub://name` for the synthetic backend.
    pub device: String,
    pub width: u32,
    pub height: u32,
    #[serde(alias = "targetX")]
    pub target_x: u32,
    #[serde(alias = "targetY")]
    pub target_y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    pub background: Rgba<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// `None` runs until a shutdown signal arrives.
    pub cycles: Option<u64>,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub jpeg_quality: u8,
    /// Longest a single capture may block before the cycle fails.
    pub capture_timeout: Duration,
}

/// Loaded configuration. Camera order is significant: it is both the
/// compositing order and the index used in cycle errors.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    pub canvas: CanvasConfig,
    pub cameras: Vec<DeviceConfig>,
    pub run: RunSettings,
}

impl MosaicConfig {
    /// Load from the file named by `MOSAIC_CONFIG`, then apply env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("MOSAIC_CONFIG")
            .map_err(|_| anyhow!("MOSAIC_CONFIG must name a config file"))?;
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let file = read_config_file(path)?;
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document without touching the environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: MosaicConfigFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MosaicConfigFile) -> Result<Self> {
        let width = file
            .output
            .as_ref()
            .and_then(|output| output.width)
            .or(file.output_width)
            .ok_or_else(|| anyhow!("output width is required"))?;
        let height = file
            .output
            .as_ref()
            .and_then(|output| output.height)
            .or(file.output_height)
            .ok_or_else(|| anyhow!("output height is required"))?;
        let background = match file.output.and_then(|output| output.background) {
            Some(raw) => parse_background(&raw)?,
            None => DEFAULT_BACKGROUND,
        };
        let run = file.run.unwrap_or_default();
        Ok(Self {
            canvas: CanvasConfig {
                width,
                height,
                background,
            },
            cameras: file.cameras,
            run: RunSettings {
                cycles: run.cycles,
                output_dir: run
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                file_prefix: run
                    .file_prefix
                    .unwrap_or_else(|| DEFAULT_FILE_PREFIX.to_string()),
                jpeg_quality: run.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                capture_timeout: Duration::from_millis(
                    run.capture_timeout_ms.unwrap_or(DEFAULT_CAPTURE_TIMEOUT_MS),
                ),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(cycles) = std::env::var("MOSAIC_CYCLES") {
            let cycles: u64 = cycles
                .trim()
                .parse()
                .map_err(|_| anyhow!("MOSAIC_CYCLES must be a non-negative integer"))?;
            self.run.cycles = Some(cycles);
        }
        if let Ok(timeout) = std::env::var("MOSAIC_CAPTURE_TIMEOUT_MS") {
            let millis: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| {
                    anyhow!("MOSAIC_CAPTURE_TIMEOUT_MS must be a number of milliseconds")
                })?;
            self.run.capture_timeout = Duration::from_millis(millis);
        }
        if let Ok(dir) = std::env::var("MOSAIC_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.run.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(background) = std::env::var("MOSAIC_BACKGROUND") {
            if !background.trim().is_empty() {
                self.canvas.background = parse_background(&background)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(anyhow!(
                "output size must be non-zero, got {}x{}",
                self.canvas.width,
                self.canvas.height
            ));
        }
        if self.cameras.is_empty() {
            return Err(anyhow!("at least one camera must be configured"));
        }
        if !(1..=100).contains(&self.run.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100, got {}",
                self.run.jpeg_quality
            ));
        }

        if self.run.capture_timeout.is_zero() {
            return Err(anyhow!("capture_timeout_ms must be non-zero"));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.width == 0 || camera.height == 0 {
                return Err(anyhow!(
                    "camera {} size must be non-zero, got {}x{}",
                    camera.device,
                    camera.width,
                    camera.height
                ));
            }
            if !seen.insert(camera.device.as_str()) {
                return Err(anyhow!("camera {} is configured twice", camera.device));
            }
            let right = u64::from(camera.target_x) + u64::from(camera.width);
            let bottom = u64::from(camera.target_y) + u64::from(camera.height);
            if right > u64::from(self.canvas.width) || bottom > u64::from(self.canvas.height) {
                log::warn!(
                    "camera {} placement ({}, {}) {}x{} extends past the {}x{} canvas and will be clipped",
                    camera.device,
                    camera.target_x,
                    camera.target_y,
                    camera.width,
                    camera.height,
                    self.canvas.width,
                    self.canvas.height
                );
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MosaicConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `#RRGGBB`, `#RRGGBBAA` or `0xRRGGBBAA` into an RGBA color.
pub fn parse_background(value: &str) -> Result<Rgba<u8>> {
    let trimmed = value.trim();
    let hex = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("background '{}' must start with '#' or '0x'", value))?;
    if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "background '{}' must be RRGGBB or RRGGBBAA hex",
            value
        ));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}
