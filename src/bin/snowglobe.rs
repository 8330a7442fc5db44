use clap::{App, Arg, ArgMatches};
use colored::*;
use snowglobe::config::{DomeConfig, SourceKind};
use snowglobe::{HeadlessDisplay, QuitSignal, SnowGlobe};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let defaults = DomeConfig::default();
    let width_help = format!("Display width in pixels ({})", defaults.display.width);
    let height_help = format!("Display height in pixels ({})", defaults.display.height);
    let radius_help = format!("Radius in pixels ({:.1})", defaults.display.radius);
    let x_help = format!("X offset in pixels ({:.1})", defaults.display.center[0]);
    let y_help = format!("Y offset in pixels ({:.1})", defaults.display.center[1]);
    let lens_help = format!("Lens offset in pixels ({:.1})", defaults.display.lens_offset);

    let matches = App::new("snowglobe")
        .version("0.1.0")
        .about("🔮 Viewer for Science on a Sphere datasets on a Snow Globe spherical display")
        .after_help(
            "The left and right arrow keys rotate the sphere; holding shift changes the \
             rotation speed. p stops the rotation and r resets the angle.",
        )
        .arg(Arg::with_name("images").short("i").help("Display an image or slideshow (default)"))
        .arg(Arg::with_name("video").short("v").help("Display a video").conflicts_with("images"))
        .arg(
            Arg::with_name("predict")
                .short("p")
                .help("Satellite tracking as a PREDICT client")
                .conflicts_with_all(&["images", "video"]),
        )
        .arg(Arg::with_name("fullscreen").short("f").help("Fullscreen"))
        .arg(number_arg("width", "w", &width_help))
        .arg(number_arg("height", "g", &height_help))
        .arg(number_arg("radius", "r", &radius_help))
        .arg(number_arg("x", "x", &x_help))
        .arg(number_arg("y", "y", &y_help))
        .arg(number_arg("lens", "o", &lens_help))
        .arg(
            Arg::with_name("tracker")
                .long("tracker")
                .value_name("DEVICE")
                .help("Serial device of the orientation sensor")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("server")
                .long("server")
                .value_name("HOST:PORT")
                .help("PREDICT server for satellite tracking")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file; flags override it")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("stats")
                .long("stats")
                .help("Print frame statistics as JSON on exit"),
        )
        .arg(
            Arg::with_name("files")
                .value_name("FILE")
                .help("Images, videos, or the base map for tracking")
                .multiple(true),
        )
        .get_matches();

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let files: Vec<PathBuf> = matches
        .values_of("files")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();
    if files.is_empty() {
        eprintln!("{}", matches.usage());
        eprintln!("{} Missing filename or path.", "Error:".red().bold());
        std::process::exit(1);
    }

    println!("{}", "🔮 Snow Globe".bright_cyan().bold());
    println!(
        "   {} {:?} · {} file(s) · {}x{} display",
        "source".bright_black(),
        config.source,
        files.len(),
        config.display.width,
        config.display.height
    );

    let session = match SnowGlobe::open(config, &files) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let input = QuitSignal::new();
    let quit = input.clone();
    ctrlc::set_handler(move || quit.raise())?;

    let stats = session.run(HeadlessDisplay::new(), input);
    info!("session finished");

    if matches.is_present("stats") {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} {} frames, {} uploads, {} late ticks",
            "✓".green(),
            stats.frames,
            stats.uploads,
            stats.late_ticks
        );
    }

    Ok(())
}

fn number_arg<'a>(name: &'a str, short: &'a str, help: &'a str) -> Arg<'a, 'a> {
    Arg::with_name(name)
        .short(short)
        .value_name("N")
        .help(help)
        .takes_value(true)
        .validator(|v| match v.parse::<f32>() {
            Ok(_) => Ok(()),
            Err(_) => Err("must be a number".into()),
        })
}

fn parse<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, String> {
    matches
        .value_of(name)
        .map(|v| v.parse::<T>().map_err(|_| format!("invalid value for {}: {}", name, v)))
        .transpose()
}

fn build_config(matches: &ArgMatches) -> Result<DomeConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => DomeConfig::load(&PathBuf::from(path))?,
        None => DomeConfig::default(),
    };

    if matches.is_present("video") {
        config.source = SourceKind::Video;
    } else if matches.is_present("predict") {
        config.source = SourceKind::Tracking;
    } else if matches.is_present("images") {
        config.source = SourceKind::Images;
    }

    if matches.is_present("fullscreen") {
        config.display.fullscreen = true;
    }
    if let Some(width) = parse(matches, "width")? {
        config.display.width = width;
    }
    if let Some(height) = parse(matches, "height")? {
        config.display.height = height;
    }
    if let Some(radius) = parse(matches, "radius")? {
        config.display.radius = radius;
    }
    if let Some(x) = parse(matches, "x")? {
        config.display.center[0] = x;
    }
    if let Some(y) = parse(matches, "y")? {
        config.display.center[1] = y;
    }
    if let Some(lens) = parse(matches, "lens")? {
        config.display.lens_offset = lens;
    }
    if let Some(device) = matches.value_of("tracker") {
        config.orientation_device = Some(PathBuf::from(device));
    }
    if let Some(server) = matches.value_of("server") {
        config.tracking.server = server.to_string();
    }

    config.validate()?;
    Ok(config)
}
