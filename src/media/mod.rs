//! Media sources feeding the display.
//!
//! Every source hands the scheduler a [`Surface`] through
//! [`MediaSource::update`]. Sources with a background producer publish
//! through a [`crate::sync::DoubleBuffer`] so the render thread only ever
//! holds the lock for one copy.

pub mod images;
pub mod tracking;
pub mod video;

pub use images::ImageSource;
pub use tracking::TrackingSource;
pub use video::{FrameSink, GifPlayer, VideoPlayer, VideoSource};

use crate::config::{DomeConfig, SourceKind};
use crate::surface::{Surface, SurfaceError};
use crate::tracking::TrackingError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no input files given")]
    NoInput,
    #[error("none of the {0} images could be loaded")]
    NoImages(usize),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("cannot open video {path}: {source}")]
    Video {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

pub trait MediaSource {
    /// The frame to upload, if a new one is ready this tick.
    fn update(&mut self) -> Option<&Surface>;

    /// Texture size the display should expect.
    fn resolution(&self) -> (u32, u32);

    /// Step through the source's items; negative `delta` steps backwards.
    fn set_index(&mut self, delta: i32);

    fn kind(&self) -> SourceKind;
}

/// Open the source named by `config.source` over `inputs`.
///
/// Images take every input in order, video treats them as a playlist, and
/// tracking uses the first as the base map.
pub fn open_source(config: &DomeConfig, inputs: &[PathBuf]) -> Result<Box<dyn MediaSource>, MediaError> {
    if inputs.is_empty() {
        return Err(MediaError::NoInput);
    }

    let source: Box<dyn MediaSource> = match config.source {
        SourceKind::Images => Box::new(ImageSource::open(inputs, config.preload_count)?),
        SourceKind::Video => {
            let resolution = (config.video.width, config.video.height);
            Box::new(VideoSource::open(GifPlayer::new(), inputs, resolution)?)
        }
        SourceKind::Tracking => {
            let icon = config.tracking.icon.as_deref().map(load_icon).transpose()?;
            Box::new(TrackingSource::open(&config.tracking, &inputs[0], icon.as_ref())?)
        }
    };

    Ok(source)
}

fn load_icon(path: &Path) -> Result<Surface, MediaError> {
    Ok(Surface::load(path)?)
}
