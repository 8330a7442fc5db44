use clap::{App, Arg};
use colored::*;
use snowglobe::orientation::{Mode, OrientationEngine};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let matches = App::new("orientation-monitor")
        .version("0.1.0")
        .about("🧭 Print the orientation sensor's rotation and mode")
        .arg(
            Arg::with_name("device")
                .help("Serial device of the orientation sensor")
                .required(true),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print one JSON snapshot per line"),
        )
        .get_matches();

    let device = Path::new(matches.value_of("device").unwrap_or_default());
    let json = matches.is_present("json");

    let mut engine = match OrientationEngine::open(device) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    ctrlc::set_handler(move || handler_running.store(false, Ordering::SeqCst))?;

    if !json {
        println!("{} {}", "🧭 Reading".bright_cyan().bold(), device.display());
    }

    while running.load(Ordering::SeqCst) && engine.is_running() {
        let snapshot = engine.snapshot();

        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            let mode = match snapshot.mode {
                Mode::Rotate => "ROTATE".green().bold(),
                Mode::Scroll => "SCROLL".yellow().bold(),
            };
            println!(
                "{}  {:>8.1}°  {} packets",
                mode,
                snapshot.rotation.to_degrees(),
                snapshot.packets
            );
        }

        thread::sleep(REFRESH_INTERVAL);
    }

    engine.close();
    Ok(())
}
