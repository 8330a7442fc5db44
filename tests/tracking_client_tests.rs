use snowglobe::config::TrackingConfig;
use snowglobe::media::{MediaSource, TrackingSource};
use snowglobe::protocol::{project, Visibility};
use snowglobe::tracking::{TrackingClient, TrackingFrame};
use snowglobe::Surface;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAP_WIDTH: u32 = 64;
const MAP_HEIGHT: u32 = 32;
const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// A PREDICT stand-in on a std socket. `respond` gets the request text and
/// returns the reply, or `None` to stay silent.
struct ScriptedServer {
    address: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScriptedServer {
    fn start<F>(mut respond: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let address = socket.local_addr().unwrap().to_string();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut buffer = [0u8; 1500];
            while !thread_stop.load(Ordering::SeqCst) {
                let Ok((len, peer)) = socket.recv_from(&mut buffer) else {
                    continue;
                };
                let request = String::from_utf8_lossy(&buffer[..len]).to_string();
                if let Some(reply) = respond(request.trim_end()) {
                    let _ = socket.send_to(reply.as_bytes(), peer);
                }
            }
        });

        Self {
            address,
            stop,
            handle: Some(handle),
        }
    }

    fn config(&self) -> TrackingConfig {
        TrackingConfig {
            server: self.address.clone(),
            poll_interval_ms: 30,
            exchange_timeout_ms: 300,
            icon: None,
        }
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn fix_reply(name: &str, longitude: f32, latitude: f32, flag: char) -> String {
    format!(
        "{}\n{} {} 10.0 20.0 1700000000 4500.0 1200.0 420.0 27600.0 12345 {} 0 0\n",
        name, longitude, latitude, flag
    )
}

fn wait_for_frame(client: &TrackingClient, done: impl Fn(&TrackingFrame) -> bool) -> TrackingFrame {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut front = TrackingFrame::default();
    loop {
        client.swap_into(&mut front);
        if done(&front) {
            return front;
        }
        assert!(Instant::now() < deadline, "tracking never produced the expected frame");
        thread::sleep(Duration::from_millis(10));
    }
}

fn black_map() -> Surface {
    Surface::filled(MAP_WIDTH, MAP_HEIGHT, OPAQUE_BLACK)
}

#[test]
fn test_satellite_at_origin_lands_mid_map() {
    let server = ScriptedServer::start(|request| match request {
        "GET_LIST" => Some("SAT1\nSAT2\n".to_string()),
        "GET_SAT SAT1" => Some(fix_reply("SAT1", 0.0, 0.0, 'V')),
        // Malformed: missing the value fields
        "GET_SAT SAT2" => Some("SAT2\nbogus\n".to_string()),
        _ => None,
    });

    let client = TrackingClient::start(&server.config(), &black_map(), None).unwrap();
    let frame = wait_for_frame(&client, |f| f.satellites.len() == 2 && f.satellites[0].position.is_some());

    let sat1 = &frame.satellites[0];
    assert_eq!(sat1.name.as_str(), "SAT1");
    assert_eq!(sat1.visibility, Visibility::Visible);
    assert_eq!(sat1.position, Some(project(0.0, 0.0, MAP_WIDTH, MAP_HEIGHT)));
    let (x, y) = sat1.position.unwrap();
    assert_eq!(y, (MAP_HEIGHT as i32 - 1) / 2);
    assert_eq!(x, 30);

    assert_eq!(frame.satellites[1].position, None);

    // A visible satellite gets a green disc around its marker
    let disc = frame.overlay.pixel(x as u32 + 5, y as u32).unwrap();
    assert!(disc[1] > disc[0] && disc[1] > 0x40, "{:?}", disc);
    assert_eq!(frame.overlay.pixel(2, 2), Some(OPAQUE_BLACK));
}

#[test]
fn test_list_failure_is_retried_next_cycle() {
    let list_requests = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&list_requests);
    let server = ScriptedServer::start(move |request| match request {
        "GET_LIST" => {
            // Ignore the first request so the client times out once
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                None
            } else {
                Some("ONLY\n".to_string())
            }
        }
        "GET_SAT ONLY" => Some(fix_reply("ONLY", 90.0, 45.0, 'D')),
        _ => None,
    });

    let client = TrackingClient::start(&server.config(), &black_map(), None).unwrap();
    let frame = wait_for_frame(&client, |f| f.satellites.len() == 1);

    assert!(list_requests.load(Ordering::SeqCst) >= 2);
    assert_eq!(frame.satellites[0].visibility, Visibility::Hidden);
    assert!(client.stats().failures >= 1);
}

#[test]
fn test_moving_satellite_leaves_trail() {
    // Two degrees west per fix moves the marker about two pixels right
    let mut longitude = 352.0f32;
    let server = ScriptedServer::start(move |request| match request {
        "GET_LIST" => Some("MOVER\n".to_string()),
        "GET_SAT MOVER" => {
            longitude -= 2.0;
            Some(fix_reply("MOVER", longitude, 0.0, 'D'))
        }
        _ => None,
    });

    let base = Surface::filled(360, 180, OPAQUE_BLACK);
    let client = TrackingClient::start(&server.config(), &base, None).unwrap();
    let start_x = project(350.0, 0.0, 360, 180).0;

    let frame = wait_for_frame(&client, |f| {
        f.satellites.len() == 1 && f.satellites[0].position.map_or(false, |(x, _)| x >= start_x + 12)
    });
    assert!(client.stats().segments >= 3);

    let (x, y) = frame.satellites[0].position.unwrap();
    // Behind the satellite the hidden trail is tinted red
    let trail = frame.overlay.pixel((x - 7) as u32, y as u32).unwrap();
    assert!(trail[0] > 0x40 && trail[1] < 0x10, "{:?}", trail);
    // Ahead of it the map is untouched
    assert_eq!(frame.overlay.pixel((x + 10) as u32, y as u32), Some(OPAQUE_BLACK));
}

fn wait_for_cycles(client: &TrackingClient, cycles: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let target = client.stats().cycles + cycles;
    while client.stats().cycles < target {
        assert!(Instant::now() < deadline, "tracking stopped cycling");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_failed_updates_keep_previous_position() {
    let requests = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&requests);
    let server = ScriptedServer::start(move |request| match request {
        "GET_LIST" => Some("STEADY\n".to_string()),
        "GET_SAT STEADY" => match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Some(fix_reply("STEADY", 100.0, 0.0, 'D')),
            1 => Some("STEADY\nbogus\n".to_string()),
            2 => {
                // Answer only after the client gave up
                thread::sleep(Duration::from_millis(400));
                Some(fix_reply("STEADY", 200.0, 0.0, 'D'))
            }
            3 => Some(fix_reply("SOMEONE-ELSE", 250.0, 0.0, 'D')),
            _ => None,
        },
        _ => None,
    });
    let config = TrackingConfig {
        poll_interval_ms: 300,
        ..server.config()
    };

    let base = Surface::filled(360, 180, OPAQUE_BLACK);
    let client = TrackingClient::start(&config, &base, None).unwrap();
    let expected = Some(project(100.0, 0.0, 360, 180));
    let first = wait_for_frame(&client, |f| f.satellites.len() == 1 && f.satellites[0].position.is_some());
    assert_eq!(first.satellites[0].position, expected);

    // Malformed, timed out, late and misaddressed replies
    let deadline = Instant::now() + Duration::from_secs(10);
    while requests.load(Ordering::SeqCst) < 5 {
        assert!(Instant::now() < deadline, "client stopped asking for fixes");
        thread::sleep(Duration::from_millis(10));
    }
    wait_for_cycles(&client, 1);

    let last = wait_for_frame(&client, |f| !f.satellites.is_empty());
    assert_eq!(last.satellites[0].position, expected);
    assert_eq!(last.overlay, first.overlay);

    let stats = client.stats();
    assert_eq!(stats.segments, 0);
    assert!(stats.failures >= 4, "{:?}", stats);
}

#[test]
fn test_slow_reply_does_not_swap_satellites() {
    let delayed = Arc::new(AtomicBool::new(false));
    let once = Arc::clone(&delayed);
    let server = ScriptedServer::start(move |request| match request {
        "GET_LIST" => Some("A\nB\n".to_string()),
        "GET_SAT A" => {
            if !once.swap(true, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(400));
            }
            Some(fix_reply("A", 10.0, 0.0, 'V'))
        }
        "GET_SAT B" => Some(fix_reply("B", 200.0, 0.0, 'V')),
        _ => None,
    });

    let base = Surface::filled(360, 180, OPAQUE_BLACK);
    let client = TrackingClient::start(&server.config(), &base, None).unwrap();
    let a = Some(project(10.0, 0.0, 360, 180));
    let b = Some(project(200.0, 0.0, 360, 180));

    wait_for_frame(&client, |f| {
        f.satellites.len() == 2 && f.satellites[0].position.is_some() && f.satellites[1].position.is_some()
    });
    wait_for_cycles(&client, 5);

    let frame = wait_for_frame(&client, |f| !f.satellites.is_empty());
    assert!(delayed.load(Ordering::SeqCst));
    assert_eq!(frame.satellites[0].position, a);
    assert_eq!(frame.satellites[1].position, b);
}

#[test]
fn test_base_map_is_first_frame_without_server() {
    // Nobody listens on this port
    let port = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let config = TrackingConfig {
        server: format!("127.0.0.1:{}", port),
        poll_interval_ms: 1000,
        exchange_timeout_ms: 100,
        icon: None,
    };

    let base = Surface::filled(8, 4, [1, 2, 3, 255]);
    let mut source = TrackingSource::with_base(&config, &base, None).unwrap();

    assert_eq!(source.resolution(), (8, 4));
    assert_eq!(source.update(), Some(&base));
    assert!(source.update().is_none());
    assert!(source.satellites().is_empty());
}

#[test]
fn test_stop_interrupts_poll_wait() {
    let server = ScriptedServer::start(|request| match request {
        "GET_LIST" => Some("SAT1\n".to_string()),
        "GET_SAT SAT1" => Some(fix_reply("SAT1", 10.0, 10.0, 'V')),
        _ => None,
    });
    let config = TrackingConfig {
        poll_interval_ms: 60_000,
        ..server.config()
    };

    let mut client = TrackingClient::start(&config, &black_map(), None).unwrap();
    wait_for_frame(&client, |f| !f.satellites.is_empty());

    let started = Instant::now();
    client.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
}
