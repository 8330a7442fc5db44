use snowglobe::orientation::*;
use snowglobe::slip::{encode_packet, Packet, Quaternion};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Hands out scripted chunks, then reports "nothing buffered" forever, like
/// an idle non-blocking serial port.
struct ScriptedSerial {
    chunks: VecDeque<Vec<u8>>,
    fail_when_drained: bool,
}

impl ScriptedSerial {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            fail_when_drained: false,
        }
    }
}

impl Read for ScriptedSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.front_mut() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.chunks.pop_front();
                }
                Ok(n)
            }
            None if self.fail_when_drained => Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

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

fn wire(quaternions: &[Quaternion]) -> Vec<u8> {
    quaternions
        .iter()
        .flat_map(|&q| encode_packet(&Packet::Orientation(q)))
        .collect()
}

fn wait_for_packets(engine: &mut OrientationEngine, count: u64) -> OrientationSnapshot {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = engine.snapshot();
        if snapshot.packets >= count {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "only {} of {} packets arrived", snapshot.packets, count);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_engine_publishes_upright_rotation() {
    let q = quaternion_from_euler(0.05, -0.05, 1.0);
    let stream = wire(&[q]);
    // Split mid-frame to exercise partial reads
    let (head, tail) = stream.split_at(6);
    let serial = ScriptedSerial::new(vec![head.to_vec(), tail.to_vec()]);

    let mut engine = OrientationEngine::spawn(serial, Path::new("scripted")).unwrap();
    let snapshot = wait_for_packets(&mut engine, 1);

    assert_eq!(snapshot.mode, Mode::Rotate);
    assert!((snapshot.rotation - 1.0).abs() < 1e-3);
    assert_eq!(engine.current_rotation(), (snapshot.rotation, Mode::Rotate));
}

#[test]
fn test_engine_switches_to_scroll_when_tipped() {
    let tipped = 143f32.to_radians();
    let packets = [
        quaternion_from_euler(0.0, 0.0, 0.5),
        quaternion_from_euler(tipped, 0.0, 0.5),
        quaternion_from_euler(tipped, 0.0, 0.8),
    ];
    let serial = ScriptedSerial::new(vec![wire(&packets)]);

    let mut engine = OrientationEngine::spawn(serial, Path::new("scripted")).unwrap();
    let snapshot = wait_for_packets(&mut engine, 3);

    assert_eq!(snapshot.mode, Mode::Scroll);
    // Scrolling starts from zero at the switch and follows the twist after it
    let (rotation, mode) = engine.current_rotation();
    assert_eq!(mode, Mode::Scroll);
    assert!((rotation - 0.3).abs() < 1e-3);
}

#[test]
fn test_engine_stops_on_read_error() {
    let mut serial = ScriptedSerial::new(vec![wire(&[quaternion_from_euler(0.0, 0.0, 0.2)])]);
    serial.fail_when_drained = true;

    let mut engine = OrientationEngine::spawn(serial, Path::new("scripted")).unwrap();
    wait_for_packets(&mut engine, 1);

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.is_running() {
        assert!(Instant::now() < deadline, "reader kept running after error");
        thread::sleep(Duration::from_millis(5));
    }
    // The last good reading stays available
    assert!((engine.snapshot().rotation - 0.2).abs() < 1e-3);
}

#[test]
fn test_close_joins_idle_reader_promptly() {
    let serial = ScriptedSerial::new(Vec::new());
    let mut engine = OrientationEngine::spawn(serial, Path::new("scripted")).unwrap();
    assert!(engine.is_running());

    let started = Instant::now();
    engine.close();
    assert!(!engine.is_running());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_missing_device_is_unavailable() {
    let result = OrientationEngine::open(Path::new("/dev/snowglobe-no-such-tracker"));
    assert!(matches!(result, Err(OrientationError::Unavailable { .. })));
}

#[test]
fn test_engine_works_as_boxed_rotation_source() {
    let serial = ScriptedSerial::new(vec![wire(&[quaternion_from_euler(0.0, 0.0, -0.7)])]);
    let mut engine = OrientationEngine::spawn(serial, Path::new("scripted")).unwrap();
    wait_for_packets(&mut engine, 1);

    let mut source: Box<dyn RotationSource> = Box::new(engine);
    let (rotation, mode) = source.current_rotation();
    assert_eq!(mode, Mode::Rotate);
    assert!((rotation + 0.7).abs() < 1e-3);
}
