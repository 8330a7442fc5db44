//! # Snow Globe
//!
//! Driver for a real-time spherical display: a projector aimed at a mirrored
//! hemisphere renders a texture wrapped onto a sphere, rotated by keyboard or
//! by an orientation sensor held in the hand.
//!
//! ## Features
//!
//! - **Fixed-tick render loop**: 33 ms ticks, sleeps when ahead, skips when behind
//! - **Three media sources**: still images, a video playlist, and a live
//!   satellite-tracking map fed by a PREDICT server over UDP
//! - **Orientation sensor**: SLIP-framed quaternions over a serial line, with
//!   a hysteretic switch between rotating the globe and scrolling the media
//! - **Lock-light handoff**: every producer thread publishes through a
//!   double buffer; the render thread only holds a lock to copy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snowglobe::{DomeConfig, HeadlessDisplay, QuitSignal, SnowGlobe};
//! use std::path::PathBuf;
//!
//! let session = SnowGlobe::open(DomeConfig::default(), &[PathBuf::from("earth.png")])?;
//! let stats = session.run(HeadlessDisplay::new(), QuitSignal::new());
//! println!("rendered {} frames", stats.frames);
//! # Ok::<(), snowglobe::DomeError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`dome`] - Session setup and teardown
//! - [`scheduler`] - The render loop, keyboard rotation and tick pacing
//! - [`media`] - Image, video and tracking sources
//! - [`orientation`] - Sensor reader thread and Rotate/Scroll state machine
//! - [`slip`] - SLIP frame decoder for the sensor link
//! - [`protocol`] - PREDICT request/reply format and UDP exchange
//! - [`tracking`] - Satellite polling thread
//! - [`overlay`] - Trail and marker drawing
//! - [`sync`] - Double buffer and cancellation token
//! - [`config`] - JSON configuration and projection uniforms

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_range_loop)]

extern crate alloc;

pub mod config;
pub mod display;
pub mod dome;
pub mod media;
pub mod orientation;
pub mod overlay;
pub mod protocol;
pub mod scheduler;
pub mod slip;
pub mod surface;
pub mod sync;
pub mod tracking;

// Re-export main public types for convenience
pub use config::{DomeConfig, ProjectionUniforms, SourceKind};
pub use display::{Display, HeadlessDisplay};
pub use dome::{DomeError, SnowGlobe};
pub use media::{MediaError, MediaSource};
pub use orientation::{Mode, OrientationEngine, RotationSource};
pub use scheduler::{FrameScheduler, InputEvent, InputSource, Key, QuitSignal, SchedulerStats};
pub use surface::Surface;
pub use tracking::{Satellite, TrackingClient};
