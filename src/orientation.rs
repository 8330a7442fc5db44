//! Orientation sensor ("Tracker") engine.
//!
//! A handheld sensor streams SLIP-framed quaternions over a serial line. Held
//! upright, twisting it rotates the globe; tipped on its side, twisting it
//! scrolls through media instead. The switch between the two uses
//! asymmetric thresholds so the mode doesn't flicker at the boundary.

use crate::slip::{FrameDecoder, Packet, Quaternion};
use crate::sync::{CancellationToken, DoubleBuffer};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Yaw is only trusted while the up axis is within this angle of either pole.
pub const ROTATE_BAND: f32 = PI / 2.5;
/// Rotate -> Scroll once the up axis tips past this angle (~94.7 degrees).
pub const SCROLL_ENTER_ANGLE: f32 = (0.5 * PI) / 0.95;
/// Scroll -> Rotate once the up axis comes back below this angle (85.5 degrees).
pub const SCROLL_EXIT_ANGLE: f32 = (0.5 * PI) * 0.95;

/// How long the reader idles when the device has nothing buffered.
pub const POLL_SLICE: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Sensor twist rotates the globe
    #[default]
    Rotate,
    /// Sensor twist scrolls through slides or video
    Scroll,
}

#[derive(Debug, Error)]
pub enum OrientationError {
    #[error("orientation device {device} unavailable: {source}")]
    Unavailable {
        device: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn orientation reader: {0}")]
    Spawn(#[source] io::Error),
}

/// Anything the frame scheduler can poll for a sensor-driven rotation.
pub trait RotationSource {
    fn current_rotation(&mut self) -> (f32, Mode);
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct OrientationSnapshot {
    pub rotation: f32,
    pub mode: Mode,
    pub packets: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl EulerAngles {
    pub fn from_quaternion(Quaternion(q): Quaternion) -> Self {
        let qq2 = q[2] * q[2];
        let roll = (2.0 * (q[0] * q[1] + q[2] * q[3])).atan2(1.0 - 2.0 * (q[1] * q[1] + qq2));
        // Clamp so float noise on a unit quaternion can't push asin out of domain
        let pitch = (2.0 * (q[0] * q[2] - q[3] * q[1])).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (q[0] * q[3] + q[1] * q[2])).atan2(1.0 - 2.0 * (qq2 + q[3] * q[3]));

        Self { roll, pitch, yaw }
    }

    /// Angular distance of the sensor's up axis from vertical.
    pub fn mode_angle(&self) -> f32 {
        (self.roll * self.roll + self.pitch * self.pitch).sqrt()
    }
}

/// True when yaw is well conditioned, i.e. away from gimbal lock.
pub fn in_rotate_band(mode_angle: f32) -> bool {
    mode_angle < ROTATE_BAND || mode_angle > PI - ROTATE_BAND
}

/// Hysteresis mode switch.
pub fn next_mode(current: Mode, mode_angle: f32) -> Mode {
    match current {
        Mode::Rotate if mode_angle > SCROLL_ENTER_ANGLE => Mode::Scroll,
        Mode::Scroll if mode_angle < SCROLL_EXIT_ANGLE => Mode::Rotate,
        unchanged => unchanged,
    }
}

/// Wrap an angle difference back into [-PI, PI].
fn wrap_offset(offset: f32) -> f32 {
    if offset < -PI {
        offset + 2.0 * PI
    } else if offset > PI {
        offset - 2.0 * PI
    } else {
        offset
    }
}

/// Pure quaternion -> (rotation, mode) state machine.
#[derive(Debug, Clone, Default)]
pub struct OrientationTracker {
    mode: Mode,
    rotation: f32,
    scroll_last: f32,
    scroll_rotation: f32,
    packets: u64,
}

impl OrientationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, quaternion: Quaternion) {
        let angles = EulerAngles::from_quaternion(quaternion);
        self.apply_angles(angles.mode_angle(), angles.yaw);
    }

    fn apply_angles(&mut self, mode_angle: f32, yaw: f32) {
        self.packets += 1;

        let rotation = if in_rotate_band(mode_angle) {
            yaw
        } else {
            // Near gimbal lock: hold whatever this mode last used
            match self.mode {
                Mode::Rotate => self.rotation,
                Mode::Scroll => self.scroll_last,
            }
        };

        let mode = next_mode(self.mode, mode_angle);
        if mode != self.mode {
            debug!("orientation mode {:?} -> {:?} at {:.1} deg", self.mode, mode, mode_angle.to_degrees());
            if mode == Mode::Scroll {
                self.scroll_last = rotation;
            }
            self.mode = mode;
        }

        match self.mode {
            Mode::Rotate => self.rotation = rotation,
            Mode::Scroll => {
                let offset = wrap_offset(rotation - self.scroll_last);
                self.scroll_last = rotation;
                self.scroll_rotation += offset;
                self.rotation = self.scroll_rotation;
            }
        }
    }

    pub fn snapshot(&self) -> OrientationSnapshot {
        OrientationSnapshot {
            rotation: self.rotation,
            mode: self.mode,
            packets: self.packets,
        }
    }
}

/// Owns the sensor device and the thread reading it.
pub struct OrientationEngine {
    device: PathBuf,
    shared: Arc<DoubleBuffer<OrientationSnapshot>>,
    front: OrientationSnapshot,
    token: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl OrientationEngine {
    /// Open a serial character device read/write and non-blocking, then
    /// start reading it.
    pub fn open(device: &Path) -> Result<Self, OrientationError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(device)
            .map_err(|source| OrientationError::Unavailable {
                device: device.to_path_buf(),
                source,
            })?;

        info!("orientation device {} opened", device.display());
        Self::spawn(file, device)
    }

    /// Start the engine on any non-blocking byte source. `WouldBlock` from
    /// `reader` means "nothing buffered yet".
    pub fn spawn<R>(reader: R, device: &Path) -> Result<Self, OrientationError>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(DoubleBuffer::new(OrientationSnapshot::default()));
        let token = CancellationToken::new();

        let thread_shared = Arc::clone(&shared);
        let thread_token = token.clone();
        let thread_device = device.to_path_buf();
        let reader = thread::Builder::new()
            .name("orientation-reader".into())
            .spawn(move || read_loop(reader, &thread_device, &thread_shared, &thread_token))
            .map_err(OrientationError::Spawn)?;

        Ok(Self {
            device: device.to_path_buf(),
            shared,
            front: OrientationSnapshot::default(),
            token,
            reader: Some(reader),
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Latest published snapshot, including the packet count.
    pub fn snapshot(&mut self) -> OrientationSnapshot {
        self.shared.swap_into(&mut self.front);
        self.front
    }

    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Stop the reader thread and release the device.
    pub fn close(&mut self) {
        self.token.cancel();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("orientation reader for {} panicked", self.device.display());
            }
        }
    }
}

impl RotationSource for OrientationEngine {
    fn current_rotation(&mut self) -> (f32, Mode) {
        let snapshot = self.snapshot();
        (snapshot.rotation, snapshot.mode)
    }
}

impl Drop for OrientationEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_nb<R: Read>(reader: &mut R, buf: &mut [u8]) -> nb::Result<usize, io::Error> {
    match reader.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Err(nb::Error::WouldBlock)
        }
        Err(e) => Err(nb::Error::Other(e)),
    }
}

fn read_loop<R: Read>(
    mut reader: R,
    device: &Path,
    shared: &DoubleBuffer<OrientationSnapshot>,
    token: &CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut tracker = OrientationTracker::new();
    let mut chunk = [0u8; READ_CHUNK];

    while !token.is_cancelled() {
        match read_nb(&mut reader, &mut chunk) {
            Ok(0) | Err(nb::Error::WouldBlock) => {
                token.wait_timeout(POLL_SLICE);
            }
            Ok(n) => {
                let mut updated = false;
                decoder.decode(&chunk[..n], |packet| {
                    if let Packet::Orientation(q) = packet {
                        tracker.apply(q);
                        updated = true;
                    }
                });

                if updated {
                    let snapshot = tracker.snapshot();
                    shared.write(|published| *published = snapshot);
                }
            }
            Err(nb::Error::Other(e)) => {
                error!("orientation device {} read failed: {}", device.display(), e);
                break;
            }
        }
    }

    debug!("orientation reader for {} exiting", device.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-4;

    fn quaternion_from_euler(roll: f32, pitch: f32, yaw: f32) -> Quaternion {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Quaternion([
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        ])
    }

    fn direct_yaw(Quaternion(q): Quaternion) -> f32 {
        (2.0 * (q[0] * q[3] + q[1] * q[2])).atan2(1.0 - 2.0 * (q[2] * q[2] + q[3] * q[3]))
    }

    #[test]
    fn test_thresholds_match_documented_degrees() {
        assert!((ROTATE_BAND.to_degrees() - 72.0).abs() < 1e-3);
        assert!(((PI - ROTATE_BAND).to_degrees() - 108.0).abs() < 1e-3);
        assert!((SCROLL_ENTER_ANGLE.to_degrees() - 94.7368).abs() < 1e-3);
        assert!((SCROLL_EXIT_ANGLE.to_degrees() - 85.5).abs() < 1e-3);
    }

    #[test]
    fn test_rotation_in_band_is_direct_yaw() {
        for &(roll, pitch, yaw) in &[(0.1, 0.05, 1.2), (-0.3, 0.2, -2.5), (0.0, 0.0, 3.0)] {
            let q = quaternion_from_euler(roll, pitch, yaw);
            let mut tracker = OrientationTracker::new();
            tracker.apply(q);

            let snapshot = tracker.snapshot();
            assert_eq!(snapshot.mode, Mode::Rotate);
            assert!((snapshot.rotation - direct_yaw(q)).abs() < TOLERANCE);
            assert!((snapshot.rotation - yaw).abs() < 1e-3);
        }
    }

    #[test]
    fn test_euler_roundtrip_mode_angle() {
        let angles = EulerAngles::from_quaternion(quaternion_from_euler(0.3, 0.4, 0.0));
        assert!((angles.mode_angle() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_no_toggle_inside_hysteresis_band() {
        let mut mode = Mode::Rotate;
        for step in 0..200 {
            let degrees = if step % 2 == 0 { 85.6 } else { 94.6 };
            mode = next_mode(mode, (degrees as f32).to_radians());
            assert_eq!(mode, Mode::Rotate);
        }

        let mut mode = Mode::Scroll;
        for step in 0..200 {
            let degrees = if step % 2 == 0 { 85.6 } else { 94.6 };
            mode = next_mode(mode, (degrees as f32).to_radians());
            assert_eq!(mode, Mode::Scroll);
        }
    }

    #[test]
    fn test_toggles_once_per_band_crossing() {
        let sequence = [80.0f32, 90.0, 95.0, 90.0, 86.0, 95.0, 85.0, 90.0, 94.0];
        let mut mode = Mode::Rotate;
        let mut toggles = Vec::new();

        for degrees in sequence {
            let next = next_mode(mode, degrees.to_radians());
            if next != mode {
                toggles.push((degrees, next));
            }
            mode = next;
        }

        assert_eq!(toggles, vec![(95.0, Mode::Scroll), (85.0, Mode::Rotate)]);
    }

    #[test]
    fn test_rotation_held_near_gimbal_lock() {
        let mut tracker = OrientationTracker::new();
        tracker.apply_angles(0.2, 1.0);
        tracker.apply_angles(80f32.to_radians(), -2.0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.mode, Mode::Rotate);
        assert!((snapshot.rotation - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_scroll_accumulates_across_branch_cut() {
        let tilted = 143f32.to_radians();
        let mut tracker = OrientationTracker::new();

        tracker.apply_angles(tilted, 179f32.to_radians());
        assert_eq!(tracker.snapshot().mode, Mode::Scroll);
        let before = tracker.snapshot().rotation;

        tracker.apply_angles(tilted, (-179f32).to_radians());
        let change = tracker.snapshot().rotation - before;

        assert!((change - 2f32.to_radians()).abs() < 1e-3, "change was {change}");
    }

    #[test]
    fn test_scroll_is_monotonic_over_full_turns() {
        let tilted = 143f32.to_radians();
        let mut tracker = OrientationTracker::new();
        let mut last = f32::MIN;

        for step in 0..=72 {
            let yaw = wrap_offset((step as f32 * 10.0).to_radians());
            tracker.apply_angles(tilted, yaw);
            let rotation = tracker.snapshot().rotation;
            assert!(rotation >= last - TOLERANCE);
            last = rotation;
        }

        // Two full turns of twisting scroll two full turns
        assert!((last - 4.0 * PI).abs() < 1e-2);
    }

    #[test]
    fn test_scroll_seeded_from_held_rotation() {
        let mut tracker = OrientationTracker::new();
        tracker.apply_angles(0.1, 0.5);
        // Enters scroll inside the hold band: seeded from the held 0.5
        tracker.apply_angles(100f32.to_radians(), 2.0);
        assert_eq!(tracker.snapshot().mode, Mode::Scroll);
        assert!((tracker.snapshot().rotation).abs() < TOLERANCE);

        tracker.apply_angles(150f32.to_radians(), 0.7);
        assert!((tracker.snapshot().rotation - 0.2).abs() < TOLERANCE);
    }
}
