//! The fixed-tick render loop.
//!
//! Each tick drains input, pulls a frame from the active media source,
//! renders once at the current rotation, then paces itself against a tick
//! schedule. Nothing in here blocks on a producer thread: sources hand over
//! frames through their double buffers and the orientation sensor through
//! its snapshot.

use crate::display::Display;
use crate::media::MediaSource;
use crate::orientation::{Mode, RotationSource};
use crate::surface::Surface;
use core::f32::consts::PI;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const TICK_INTERVAL_MS: u64 = 33;
/// Smallest commanded rotation step, in radians per tick.
pub const ROTATION_INTERVAL: f32 = PI / (120.0 * (1000.0 / TICK_INTERVAL_MS as f32));
/// Rotation speed while an arrow key is held.
pub const ROTATION_CONSTANT: f32 = 30.5 * ROTATION_INTERVAL;
pub const HOME_ROTATION: [f32; 2] = [PI, 0.0];
/// Scroll angle that advances the media source by one item.
pub const SCROLL_STEP: f32 = PI / 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Pause,
    Reset,
    Escape,
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown { key: Key, shift: bool },
    KeyUp(Key),
    /// Window close or termination signal.
    Quit,
}

pub trait InputSource {
    /// Append every event received since the last poll.
    fn poll(&mut self, events: &mut Vec<InputEvent>);
}

/// Input that only ever reports a quit, once raised. Clones share the flag,
/// so one clone can be handed to a signal handler.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal {
    flag: Arc<AtomicBool>,
}

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl InputSource for QuitSignal {
    fn poll(&mut self, events: &mut Vec<InputEvent>) {
        if self.flag.load(Ordering::SeqCst) {
            events.push(InputEvent::Quit);
        }
    }
}

fn close_enough(a: f32, b: f32) -> bool {
    (a - b).abs() < ROTATION_INTERVAL / 2.0
}

/// Keyboard-controlled view angles and their per-tick deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotationState {
    pub rotation: [f32; 2],
    pub drotation: [f32; 2],
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            rotation: HOME_ROTATION,
            drotation: [0.0, 0.0],
        }
    }
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: Key, shift: bool) {
        let (axis, sign) = match key {
            Key::Left => (0, 1.0),
            Key::Right => (0, -1.0),
            Key::Up => (1, 1.0),
            Key::Down => (1, -1.0),
            Key::Pause => {
                self.drotation = [0.0, 0.0];
                return;
            }
            Key::Reset => {
                self.rotation = HOME_ROTATION;
                return;
            }
            Key::Escape | Key::Next | Key::Previous => return,
        };

        if shift {
            self.drotation[axis] += sign * ROTATION_INTERVAL;
        } else {
            self.drotation[axis] = sign * ROTATION_CONSTANT;
        }
    }

    /// Releasing an arrow stops only a held-key spin, never a nudged speed.
    pub fn key_up(&mut self, key: Key) {
        let (axis, sign) = match key {
            Key::Left => (0, 1.0),
            Key::Right => (0, -1.0),
            Key::Up => (1, 1.0),
            Key::Down => (1, -1.0),
            _ => return,
        };

        if close_enough(self.drotation[axis], sign * ROTATION_CONSTANT) {
            self.drotation[axis] = 0.0;
        }
    }

    pub fn advance(&mut self) {
        self.rotation[0] += self.drotation[0];
        self.rotation[1] += self.drotation[1];
    }
}

/// Tick pacing. Sleeps off any time left before the next tick; when behind,
/// skips whole ticks instead of rendering faster to catch up.
#[derive(Debug, Clone)]
pub struct TickTimer {
    interval: Duration,
    next: Instant,
    late_ticks: u64,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        debug_assert!(!interval.is_zero(), "tick interval must be non-zero");
        Self {
            interval,
            next: start + interval,
            late_ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// Advance the schedule past `now` and return how long to sleep, if the
    /// tick is still ahead of us.
    pub fn plan(&mut self, now: Instant) -> Option<Duration> {
        if self.next > now {
            let remaining = self.next - now;
            self.next += self.interval;
            return Some(remaining);
        }

        self.late_ticks += 1;
        while self.next <= now {
            self.next += self.interval;
        }
        None
    }

    pub fn wait(&mut self) {
        if let Some(remaining) = self.plan(Instant::now()) {
            thread::sleep(remaining);
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub frames: u64,
    pub uploads: u64,
    pub late_ticks: u64,
    pub media_steps: u64,
    pub non_power_of_two_uploads: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Quit,
}

/// Turns sensor scroll into whole media steps.
#[derive(Debug, Default, Clone, Copy)]
struct ScrollTracker {
    anchor: Option<f32>,
}

impl ScrollTracker {
    fn steps(&mut self, scroll: f32) -> i32 {
        let anchor = *self.anchor.get_or_insert(scroll);
        let steps = ((scroll - anchor) / SCROLL_STEP).trunc() as i32;
        if steps != 0 {
            self.anchor = Some(anchor + steps as f32 * SCROLL_STEP);
        }
        steps
    }

    fn reset(&mut self) {
        self.anchor = None;
    }
}

pub struct FrameScheduler<D: Display, I: InputSource> {
    display: D,
    input: I,
    media: Box<dyn MediaSource>,
    sensor: Option<Box<dyn RotationSource>>,
    rotation: RotationState,
    sensor_rotation: f32,
    scroll: ScrollTracker,
    timer: TickTimer,
    events: Vec<InputEvent>,
    warned_resolution: Option<(u32, u32)>,
    stats: SchedulerStats,
}

impl<D: Display, I: InputSource> FrameScheduler<D, I> {
    pub fn new(display: D, input: I, media: Box<dyn MediaSource>) -> Self {
        Self {
            display,
            input,
            media,
            sensor: None,
            rotation: RotationState::new(),
            sensor_rotation: 0.0,
            scroll: ScrollTracker::default(),
            timer: TickTimer::new(Duration::from_millis(TICK_INTERVAL_MS)),
            events: Vec::with_capacity(16),
            warned_resolution: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn with_sensor(mut self, sensor: Box<dyn RotationSource>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.timer = TickTimer::new(interval);
        self
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn rotation(&self) -> &RotationState {
        &self.rotation
    }

    /// The angles handed to the display: keyboard rotation plus the sensor's
    /// horizontal rotation.
    pub fn view_rotation(&self) -> [f32; 2] {
        [self.rotation.rotation[0] + self.sensor_rotation, self.rotation.rotation[1]]
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            late_ticks: self.timer.late_ticks(),
            ..self.stats
        }
    }

    /// Run until a quit input arrives.
    pub fn run(&mut self) -> SchedulerStats {
        info!("render loop started, tick {:?}", self.timer.interval());
        self.timer = TickTimer::new(self.timer.interval());

        while self.tick() == TickOutcome::Continue {}

        let stats = self.stats();
        info!(
            "render loop stopped after {} frames ({} uploads, {} late ticks)",
            stats.frames, stats.uploads, stats.late_ticks
        );
        stats
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.handle_input() == TickOutcome::Quit {
            return TickOutcome::Quit;
        }
        self.update_media();
        self.display.render(self.view_rotation());
        self.stats.frames += 1;
        self.timer.wait();
        self.rotation.advance();
        TickOutcome::Continue
    }

    fn handle_input(&mut self) -> TickOutcome {
        self.events.clear();
        self.input.poll(&mut self.events);

        let mut media_delta = 0i32;
        for event in self.events.drain(..) {
            match event {
                InputEvent::Quit | InputEvent::KeyDown { key: Key::Escape, .. } => {
                    debug!("quit requested");
                    return TickOutcome::Quit;
                }
                InputEvent::KeyDown { key: Key::Next, .. } => media_delta += 1,
                InputEvent::KeyDown { key: Key::Previous, .. } => media_delta -= 1,
                InputEvent::KeyDown { key, shift } => self.rotation.key_down(key, shift),
                InputEvent::KeyUp(key) => self.rotation.key_up(key),
            }
        }

        if let Some(sensor) = self.sensor.as_mut() {
            let (angle, mode) = sensor.current_rotation();
            match mode {
                Mode::Rotate => {
                    self.sensor_rotation = angle;
                    self.scroll.reset();
                }
                Mode::Scroll => media_delta += self.scroll.steps(angle),
            }
        }

        if media_delta != 0 {
            self.media.set_index(media_delta);
            self.stats.media_steps += u64::from(media_delta.unsigned_abs());
        }
        TickOutcome::Continue
    }

    fn update_media(&mut self) {
        let Some(surface) = self.media.update() else {
            return;
        };

        if !surface.is_power_of_two() {
            self.stats.non_power_of_two_uploads += 1;
            if self.warned_resolution != Some(surface.resolution()) {
                warn_not_power_of_two(surface);
                self.warned_resolution = Some(surface.resolution());
            }
        }

        self.display.upload(surface);
        self.stats.uploads += 1;
    }
}

fn warn_not_power_of_two(surface: &Surface) {
    warn!(
        "dimensions ({}, {}) not a power of 2",
        surface.width(),
        surface.height()
    );
}
