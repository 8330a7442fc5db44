//! Background satellite tracking client.
//!
//! One worker thread owns the UDP link and the trail canvas. Each poll cycle
//! it queries every tracked satellite, extends the trails, composes markers
//! and publishes the result through a [`DoubleBuffer`].

use crate::config::TrackingConfig;
use crate::overlay::{OverlayError, TrailCanvas};
use crate::protocol::{
    project, PredictLink, ProtocolError, SatelliteFix, SatelliteList, SatelliteName, Visibility,
    MAX_SATELLITES,
};
use crate::surface::Surface;
use crate::sync::{CancellationToken, DoubleBuffer};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Overlay(#[from] OverlayError),
    #[error("failed to start tracking worker: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Satellite {
    pub name: SatelliteName,
    pub longitude: f32,
    pub latitude: f32,
    pub visibility: Visibility,
    /// Pixel position on the map, once a fix has been received.
    pub position: Option<(i32, i32)>,
}

impl Satellite {
    pub fn new(name: SatelliteName) -> Self {
        Self {
            name,
            longitude: 0.0,
            latitude: 0.0,
            visibility: Visibility::Hidden,
            position: None,
        }
    }

    /// Record a fix and return the previous pixel position.
    pub fn apply(&mut self, fix: SatelliteFix, width: u32, height: u32) -> Option<(i32, i32)> {
        self.longitude = fix.longitude;
        self.latitude = fix.latitude;
        self.visibility = fix.visibility;
        self.position
            .replace(project(fix.longitude, fix.latitude, width, height))
    }
}

/// Whether a move from `from` to `to` gets a trail segment. Jumps wider than
/// a quarter of the map are taken to be wraps across the date line.
pub fn should_draw(from: (i32, i32), to: (i32, i32), width: u32) -> bool {
    from != to && (to.0 - from.0).unsigned_abs() < width / 4
}

/// What the tracking worker publishes each cycle.
#[derive(Debug, Default, PartialEq)]
pub struct TrackingFrame {
    pub overlay: Surface,
    pub satellites: Vec<Satellite>,
}

impl Clone for TrackingFrame {
    fn clone(&self) -> Self {
        Self {
            overlay: self.overlay.clone(),
            satellites: self.satellites.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.overlay.clone_from(&source.overlay);
        self.satellites.clone_from(&source.satellites);
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct TrackingStats {
    pub cycles: u64,
    pub exchanges: u64,
    pub failures: u64,
    pub segments: u64,
}

pub struct TrackingClient {
    shared: Arc<DoubleBuffer<TrackingFrame>>,
    stats: Arc<parking_lot::Mutex<TrackingStats>>,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
    resolution: (u32, u32),
}

impl TrackingClient {
    /// Start polling `config.server`, drawing onto a copy of `base`. The
    /// base map is published immediately so the first frame is never blank.
    pub fn start(config: &TrackingConfig, base: &Surface, icon: Option<&Surface>) -> Result<Self, TrackingError> {
        let canvas = TrailCanvas::new(base, icon)?;
        let shared = Arc::new(DoubleBuffer::new_dirty(TrackingFrame {
            overlay: base.clone(),
            satellites: Vec::new(),
        }));
        let stats = Arc::new(parking_lot::Mutex::new(TrackingStats::default()));
        let token = CancellationToken::new();

        let worker = {
            let config = config.clone();
            let shared = Arc::clone(&shared);
            let stats = Arc::clone(&stats);
            let token = token.clone();
            thread::Builder::new()
                .name("tracking-client".into())
                .spawn(move || {
                    let mut worker = Worker {
                        canvas,
                        satellites: heapless::Vec::new(),
                        shared,
                        stats,
                        token,
                    };
                    worker.run(&config);
                })
                .map_err(TrackingError::Spawn)?
        };

        Ok(Self {
            shared,
            stats,
            token,
            worker: Some(worker),
            resolution: base.resolution(),
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Copy the latest published frame into `front` if one is pending.
    pub fn swap_into(&self, front: &mut TrackingFrame) -> bool {
        self.shared.swap_into(front)
    }

    pub fn stats(&self) -> TrackingStats {
        *self.stats.lock()
    }

    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("tracking worker panicked");
            }
        }
    }
}

impl Drop for TrackingClient {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    canvas: TrailCanvas,
    satellites: heapless::Vec<Satellite, MAX_SATELLITES>,
    shared: Arc<DoubleBuffer<TrackingFrame>>,
    stats: Arc<parking_lot::Mutex<TrackingStats>>,
    token: CancellationToken,
}

impl Worker {
    fn run(&mut self, config: &TrackingConfig) {
        let mut link = match PredictLink::connect(&config.server, config.exchange_timeout()) {
            Ok(link) => link,
            Err(e) => {
                error!("tracking disabled: {}", e);
                return;
            }
        };
        info!("tracking satellites from {}", link.server());

        let mut listed = false;
        loop {
            if !listed {
                match self.fetch_satellites(&mut link) {
                    Ok(()) => listed = true,
                    Err(ProtocolError::Cancelled) => break,
                    Err(e) => warn!("failed to get satellite list, retrying next cycle: {}", e),
                }
            }

            if listed {
                if let Err(ProtocolError::Cancelled) = self.update_satellites(&mut link) {
                    break;
                }
                self.publish();
            }

            self.stats.lock().cycles += 1;
            if self.token.wait_timeout(config.poll_interval()) {
                break;
            }
        }

        debug!("tracking worker stopped");
    }

    /// Fetch the satellite list and each satellite's starting position.
    /// Nothing is drawn for these first fixes.
    fn fetch_satellites(&mut self, link: &mut PredictLink) -> Result<(), ProtocolError> {
        let names: SatelliteList = self.exchange(|token| link.satellite_list(token))?;

        self.satellites.clear();
        for name in names {
            // Both sides are capped at MAX_SATELLITES
            let _ = self.satellites.push(Satellite::new(name));
        }
        info!("tracking {} satellites", self.satellites.len());

        let (width, height) = (self.canvas.width(), self.canvas.height());
        for i in 0..self.satellites.len() {
            let name = self.satellites[i].name;
            match self.exchange(|token| link.satellite_fix(&name, token)) {
                Ok(fix) => {
                    self.satellites[i].apply(fix, width, height);
                }
                Err(ProtocolError::Cancelled) => return Err(ProtocolError::Cancelled),
                Err(e) => warn!("no initial position for {}: {}", name, e),
            }
        }
        Ok(())
    }

    /// Refresh every satellite, drawing a trail segment for each that moved.
    fn update_satellites(&mut self, link: &mut PredictLink) -> Result<(), ProtocolError> {
        let (width, height) = (self.canvas.width(), self.canvas.height());

        for i in 0..self.satellites.len() {
            let name = self.satellites[i].name;
            let fix = match self.exchange(|token| link.satellite_fix(&name, token)) {
                Ok(fix) => fix,
                Err(ProtocolError::Cancelled) => return Err(ProtocolError::Cancelled),
                Err(e) => {
                    warn!("failed to update {}: {}", name, e);
                    continue;
                }
            };

            let satellite = &mut self.satellites[i];
            let previous = satellite.apply(fix, width, height);
            if let (Some(from), Some(to)) = (previous, satellite.position) {
                if should_draw(from, to, width) {
                    self.canvas.draw_segment(from, to, satellite.visibility);
                    self.stats.lock().segments += 1;
                }
            }
        }
        Ok(())
    }

    fn publish(&mut self) {
        self.canvas.compose(&self.satellites);
        let canvas = &self.canvas;
        let satellites = &self.satellites;
        self.shared.write(|frame| {
            canvas.copy_into(&mut frame.overlay);
            frame.satellites.clear();
            frame.satellites.extend_from_slice(satellites);
        });
    }

    fn exchange<T>(
        &self,
        f: impl FnOnce(&CancellationToken) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let result = f(&self.token);
        let mut stats = self.stats.lock();
        stats.exchanges += 1;
        if result.is_err() {
            stats.failures += 1;
        }
        result
    }
}
