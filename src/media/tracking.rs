use super::{MediaError, MediaSource};
use crate::config::{SourceKind, TrackingConfig};
use crate::surface::Surface;
use crate::tracking::{Satellite, TrackingClient, TrackingFrame, TrackingStats};
use std::path::Path;
use tracing::{debug, info};

/// A world map with live satellite trails drawn over it.
pub struct TrackingSource {
    client: TrackingClient,
    front: TrackingFrame,
}

impl TrackingSource {
    pub fn open(config: &TrackingConfig, base_map: &Path, icon: Option<&Surface>) -> Result<Self, MediaError> {
        let base = Surface::load(base_map)?;
        info!(
            "tracking over {} ({}x{})",
            base_map.display(),
            base.width(),
            base.height()
        );
        Self::with_base(config, &base, icon)
    }

    pub fn with_base(config: &TrackingConfig, base: &Surface, icon: Option<&Surface>) -> Result<Self, MediaError> {
        let client = TrackingClient::start(config, base, icon)?;
        Ok(Self {
            client,
            front: TrackingFrame::default(),
        })
    }

    /// Satellites as of the last frame handed out by `update`.
    pub fn satellites(&self) -> &[Satellite] {
        &self.front.satellites
    }

    pub fn stats(&self) -> TrackingStats {
        self.client.stats()
    }
}

impl MediaSource for TrackingSource {
    fn update(&mut self) -> Option<&Surface> {
        if self.client.swap_into(&mut self.front) {
            Some(&self.front.overlay)
        } else {
            None
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.client.resolution()
    }

    fn set_index(&mut self, delta: i32) {
        debug!("tracking has a single view, ignoring step {}", delta);
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Tracking
    }
}
