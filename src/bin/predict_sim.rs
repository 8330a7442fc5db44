//! Stand-in PREDICT server for running the tracking source without a real
//! ground station. Satellites follow simple sinusoidal ground tracks.

use clap::{App, Arg};
use colored::*;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:1210";
const RECEIVE_BUFFER_SIZE: usize = 1500;

struct SimulatedSatellite {
    name: &'static str,
    /// Longitude (degrees west) at start.
    longitude: f32,
    /// Ground-track drift, degrees of longitude per second.
    drift: f32,
    inclination: f32,
    /// Orbital period in seconds.
    period: f32,
}

const SATELLITES: &[SimulatedSatellite] = &[
    SimulatedSatellite { name: "ISS", longitude: 120.0, drift: 4.0, inclination: 51.6, period: 92.0 * 0.6 },
    SimulatedSatellite { name: "NOAA-19", longitude: 10.0, drift: 3.6, inclination: 80.0, period: 102.0 * 0.6 },
    SimulatedSatellite { name: "AO-91", longitude: 250.0, drift: 3.7, inclination: 82.0, period: 95.0 * 0.6 },
    SimulatedSatellite { name: "HUBBLE", longitude: 300.0, drift: 4.1, inclination: 28.5, period: 95.0 * 0.6 },
];

impl SimulatedSatellite {
    fn position(&self, seconds: f32) -> (f32, f32, bool) {
        let phase = seconds / self.period * std::f32::consts::TAU;
        let longitude = (self.longitude + self.drift * seconds).rem_euclid(360.0);
        let latitude = self.inclination * phase.sin();
        // Pretend the ground station sees whatever is over the western half
        let visible = longitude > 60.0 && longitude < 120.0;
        (longitude, latitude, visible)
    }

    /// A reply in PREDICT's `GET_SAT` layout: name line, then longitude,
    /// latitude, azimuth, elevation, next AOS/LOS, footprint, range,
    /// altitude, velocity, orbit number, visibility, and trailing fields.
    fn reply(&self, seconds: f32) -> String {
        let (longitude, latitude, visible) = self.position(seconds);
        format!(
            "{}\n{:.2} {:.2} {:.2} {:.2} {} {:.2} {:.2} {:.2} {:.2} {} {} {:.2} {:.2} {:.2}\n",
            self.name,
            longitude,
            latitude,
            180.0,
            if visible { 20.0 } else { -20.0 },
            1_700_000_000u64 + seconds as u64,
            4500.0,
            1200.0,
            420.0,
            27600.0,
            40000 + (seconds / self.period) as u64,
            if visible { 'V' } else { 'D' },
            0.0,
            0.0,
            0.0,
        )
    }
}

fn handle(request: &str, started: Instant) -> Option<String> {
    let request = request.trim_end();
    let seconds = started.elapsed().as_secs_f32();

    if request == "GET_LIST" {
        return Some(SATELLITES.iter().map(|s| format!("{}\n", s.name)).collect());
    }

    let name = request.strip_prefix("GET_SAT ")?;
    SATELLITES
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.reply(seconds))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("predict-sim")
        .version("0.1.0")
        .about("🛰️  Simulated PREDICT server for the snowglobe tracking source")
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Address to listen on")
                .takes_value(true)
                .default_value(DEFAULT_BIND),
        )
        .get_matches();

    let bind = matches.value_of("bind").unwrap_or(DEFAULT_BIND);
    let socket = UdpSocket::bind(bind).await?;

    println!("{}", "🛰️  PREDICT simulator".bright_cyan().bold());
    println!("   listening on {}", socket.local_addr()?.to_string().green());
    for satellite in SATELLITES {
        println!("   {} {}", "•".bright_black(), satellite.name);
    }

    let started = Instant::now();
    let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buffer) => {
                let (len, peer) = received?;
                let Ok(request) = std::str::from_utf8(&buffer[..len]) else {
                    warn!("non-UTF-8 request from {}", peer);
                    continue;
                };

                match handle(request, started) {
                    Some(reply) => {
                        debug!("{} {:?}", peer, request.trim_end());
                        socket.send_to(reply.as_bytes(), peer).await?;
                    }
                    // PREDICT stays silent on requests it does not understand
                    None => warn!("unknown request from {}: {:?}", peer, request.trim_end()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
