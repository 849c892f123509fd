pub mod background;
pub mod capture;
pub mod clock;
pub mod compositor;
pub mod error;
pub mod mask;
pub mod pipeline;
pub mod sink;
pub mod utils;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::PipelineError;
pub use mask::ModelKind;
pub use pipeline::{FrameOutcome, VirtualCamera};

/// Prefix for environment overrides, e.g. `BACKDROP__STREAM__FPS=15`
pub const ENV_PREFIX: &str = "BACKDROP";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub capture: CaptureConfig,
    pub mask: MaskConfig,
    pub background: BackgroundConfig,
    pub output: OutputConfig,
}

/// Output stream parameters, fixed for the stream's lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Ticks per second of output timestamps
    pub timescale: u32,
    pub queue_capacity: usize,
    /// Pin the producer thread to this core
    pub producer_core: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    V4l2,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSourceKind,
    /// Device path; empty means auto-detect
    pub device: String,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    pub model: ModelKind,
    pub input_width: u32,
    pub input_height: u32,
    pub foreground_class: u32,
    pub blur_sigma: f32,
    /// Green lead over red/blue the chroma-key backend treats as background
    pub key_threshold: u8,
    /// Dispatched frames between mask refreshes; defaults to the frame rate
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// `http(s)://` URL or file path
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// v4l2loopback device to write composited frames to
    pub device: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device_id: "backdrop-virtual-camera".into(),
            width: 1280,
            height: 720,
            fps: 30,
            timescale: 600,
            queue_capacity: 30,
            producer_core: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSourceKind::V4l2,
            device: String::new(),
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::ChromaKey,
            input_width: 513,
            input_height: 513,
            foreground_class: mask::PERSON_CLASS,
            blur_sigma: 6.0,
            key_threshold: 40,
            interval: None,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::Config("stream size must be non-zero".into()));
        }
        if self.fps == 0 || self.timescale == 0 {
            return Err(PipelineError::Config(
                "frame rate and timescale must be non-zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue capacity must be non-zero".into()));
        }
        Ok(())
    }
}

impl MaskConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err(PipelineError::Config("model input size must be non-zero".into()));
        }
        if self.interval == Some(0) {
            return Err(PipelineError::Config("mask interval must be non-zero".into()));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(PipelineError::Config("blur sigma must be >= 0".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load from `path` (or `backdrop.toml` if present) layered with
    /// `BACKDROP__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("backdrop").required(false),
        };
        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.stream.validate()?;
        self.mask.validate()
    }
}
