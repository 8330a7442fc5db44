//! Session configuration, loaded from JSON and overridden from the command
//! line. Every field has a default so a partial file is enough.

use crate::protocol::{DEFAULT_EXCHANGE_TIMEOUT, DEFAULT_SERVER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 33;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PRELOAD_COUNT: usize = 1;
pub const DEFAULT_VIDEO_WIDTH: u32 = 1024;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Images,
    Video,
    Tracking,
}

/// Physical layout of the projector and the spherical mirror it shines on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    /// Radius of the projected disc, in pixels.
    pub radius: f32,
    /// Lens offset from the sphere, in pixels.
    pub lens_offset: f32,
    /// Center of the projected disc, in pixels.
    pub center: [f32; 2],
    pub fullscreen: bool,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: 848,
            height: 480,
            radius: 378.0,
            lens_offset: 370.0,
            center: [431.0, 210.0],
            fullscreen: false,
        }
    }
}

/// Normalized values handed to the projection shader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectionUniforms {
    /// Disc radius relative to the output height.
    pub radius: f32,
    /// Lens offset relative to the disc radius.
    pub height: f32,
    /// Disc center relative to the output size.
    pub center: [f32; 2],
    pub aspect: f32,
    /// Size of one source texel in texture coordinates.
    pub texel: [f32; 2],
}

impl DisplayGeometry {
    pub fn uniforms(&self, texture: (u32, u32)) -> ProjectionUniforms {
        let width = self.width as f32;
        let height = self.height as f32;
        ProjectionUniforms {
            radius: self.radius / height,
            height: self.lens_offset / self.radius,
            center: [self.center[0] / width, self.center[1] / height],
            aspect: width / height,
            texel: [1.0 / texture.0.max(1) as f32, 1.0 / texture.1.max(1) as f32],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// `host:port` of the PREDICT server.
    pub server: String,
    pub poll_interval_ms: u64,
    pub exchange_timeout_ms: u64,
    /// Optional marker drawn at each satellite position.
    pub icon: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            exchange_timeout_ms: DEFAULT_EXCHANGE_TIMEOUT.as_millis() as u64,
            icon: None,
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIDEO_WIDTH,
            height: DEFAULT_VIDEO_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomeConfig {
    pub display: DisplayGeometry,
    pub source: SourceKind,
    /// Images decoded before the first frame; the rest load in the background.
    pub preload_count: usize,
    pub tick_interval_ms: u64,
    pub tracking: TrackingConfig,
    pub video: VideoConfig,
    /// Serial device of the orientation sensor, if one is attached.
    pub orientation_device: Option<PathBuf>,
}

impl Default for DomeConfig {
    fn default() -> Self {
        Self {
            display: DisplayGeometry::default(),
            source: SourceKind::default(),
            preload_count: DEFAULT_PRELOAD_COUNT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            tracking: TrackingConfig::default(),
            video: VideoConfig::default(),
            orientation_device: None,
        }
    }
}

impl DomeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid("display size must be non-zero"));
        }
        if self.display.radius <= 0.0 {
            return Err(ConfigError::Invalid("display radius must be positive"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be non-zero"));
        }
        if self.video.width == 0 || self.video.height == 0 {
            return Err(ConfigError::Invalid("video size must be non-zero"));
        }
        if self.tracking.exchange_timeout_ms == 0 {
            return Err(ConfigError::Invalid("exchange timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
