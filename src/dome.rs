//! Session setup and teardown.

use crate::config::{ConfigError, DomeConfig};
use crate::display::Display;
use crate::media::{self, MediaError, MediaSource};
use crate::orientation::{OrientationEngine, OrientationError, RotationSource};
use crate::scheduler::{FrameScheduler, InputSource, SchedulerStats};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DomeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Orientation(#[from] OrientationError),
}

/// One display session: a media source and an optional orientation sensor.
pub struct SnowGlobe {
    config: DomeConfig,
    media: Box<dyn MediaSource>,
    orientation: Option<OrientationEngine>,
}

impl SnowGlobe {
    /// Open the configured source over `inputs` and, if a device is
    /// configured, the orientation sensor. A sensor that cannot be opened
    /// leaves keyboard control in charge; any other failure is fatal.
    pub fn open(config: DomeConfig, inputs: &[PathBuf]) -> Result<Self, DomeError> {
        config.validate()?;
        let media = media::open_source(&config, inputs)?;

        let orientation = match &config.orientation_device {
            Some(device) => match OrientationEngine::open(device) {
                Ok(engine) => Some(engine),
                Err(OrientationError::Unavailable { device, source }) => {
                    warn!(
                        "orientation device {} unavailable ({}), using keyboard only",
                        device.display(),
                        source
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        Ok(Self::with_parts(config, media, orientation))
    }

    pub fn with_parts(
        config: DomeConfig,
        media: Box<dyn MediaSource>,
        orientation: Option<OrientationEngine>,
    ) -> Self {
        info!(
            "{:?} source at {}x{}, orientation {}",
            media.kind(),
            media.resolution().0,
            media.resolution().1,
            if orientation.is_some() { "attached" } else { "absent" }
        );
        Self {
            config,
            media,
            orientation,
        }
    }

    pub fn config(&self) -> &DomeConfig {
        &self.config
    }

    pub fn has_orientation(&self) -> bool {
        self.orientation.is_some()
    }

    /// Configure `display` for this source and run the render loop until
    /// `input` asks to quit. Background threads stop when this returns.
    pub fn run<D: Display, I: InputSource>(self, mut display: D, input: I) -> SchedulerStats {
        let uniforms = self.config.display.uniforms(self.media.resolution());
        display.configure(&uniforms);

        let mut scheduler =
            FrameScheduler::new(display, input, self.media).with_tick_interval(self.config.tick_interval());
        if let Some(engine) = self.orientation {
            let sensor: Box<dyn RotationSource> = Box::new(engine);
            scheduler = scheduler.with_sensor(sensor);
        }

        scheduler.run()
    }
}
