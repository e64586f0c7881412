//! tracker-replay - replay a recorded live feed through a reconciler
//!
//! Usage:
//!   tracker-replay <feed.jsonl> --tracker <id> [--history <records.json>] [--route <route.json>]
//!
//! Each line of the feed file is one JSON feed message. Messages for other
//! trackers are ignored. Prints the resulting track, telemetry summaries and,
//! when a planned route is given, the progress split.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{info, warn};
use shipment_tracker::{
    geo_utils, metric, normalize_history, parse_history, FeedHub, GeoPoint,
    RouteTelemetryReconciler, SelectionGuard,
};

const VIEWPORT_MARGIN_METERS: f64 = 2_000.0;

#[derive(Parser)]
#[command(name = "tracker-replay")]
#[command(about = "Replay a recorded telemetry feed and report track progress", long_about = None)]
struct Cli {
    /// Feed recording, one JSON message per line
    feed: PathBuf,

    /// Tracker or shipment id to follow
    #[arg(short, long)]
    tracker: String,

    /// Historical records (JSON) to seed the reconciler with
    #[arg(long)]
    history: Option<PathBuf>,

    /// Planned route as a JSON array of {"lat", "lng"} points
    #[arg(short, long)]
    route: Option<PathBuf>,

    /// Print every track point
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> shipment_tracker::Result<()> {
    let mut reconciler = RouteTelemetryReconciler::new();

    if let Some(path) = &cli.history {
        let records = parse_history(&fs::read(path)?)?;
        reconciler.load_batch(normalize_history(&records));
    }

    let hub = FeedHub::default();
    let guard = SelectionGuard::new();
    let mut subscription = hub.subscribe(cli.tracker.as_str(), &guard);

    let reader = BufReader::new(File::open(&cli.feed)?);
    let mut lines = 0usize;
    let mut malformed = 0usize;
    let mut delivered = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        if hub.publish_json(&line).is_err() {
            malformed += 1;
            continue;
        }
        delivered += subscription.drain_into(&mut reconciler);
    }
    subscription.close();

    info!(
        "Replayed {} messages: {} for {}, {} malformed",
        lines, delivered, cli.tracker, malformed
    );

    print_report(cli, &reconciler)
}

fn print_report(cli: &Cli, reconciler: &RouteTelemetryReconciler) -> shipment_tracker::Result<()> {
    println!("\n{}", "=".repeat(60));
    println!("Tracker {}", cli.tracker);
    println!("{}", "=".repeat(60));

    let track = reconciler.track();
    println!("Track points:       {}", track.len());
    println!("Distance travelled: {:.1} km", reconciler.distance_travelled() / 1000.0);
    match reconciler.current_position() {
        Some(p) => println!("Current position:   {:.5}, {:.5}", p.latitude, p.longitude),
        None => println!("Current position:   unknown"),
    }

    if cli.verbose {
        for (i, p) in track.iter().enumerate() {
            println!("  #{:<4} {:.5}, {:.5}", i, p.latitude, p.longitude);
        }
    }

    println!("\nTelemetry:");
    let series = reconciler.series();
    if series.is_empty() {
        println!("  (none)");
    }
    for name in series.metrics() {
        if let Some(s) = series.summary(name) {
            let unit = match name {
                metric::TEMPERATURE => "°C",
                metric::HUMIDITY | metric::BATTERY => "%",
                metric::SPEED => "km/h",
                _ => "",
            };
            println!(
                "  {:<12} latest {:>8.2}{} min {:>8.2} max {:>8.2} ({} samples)",
                name, s.latest, unit, s.min, s.max, s.count
            );
        }
    }

    let planned: Vec<GeoPoint> = match &cli.route {
        Some(path) => serde_json::from_slice(&fs::read(path)?)?,
        None => Vec::new(),
    };

    if let Some(view) = reconciler.viewport(&planned, VIEWPORT_MARGIN_METERS) {
        let center = view.center();
        println!("\nViewport:");
        println!("  Lat {:.5} .. {:.5}", view.min_lat, view.max_lat);
        println!("  Lng {:.5} .. {:.5}", view.min_lng, view.max_lng);
        println!("  Center {:.5}, {:.5}", center.latitude, center.longitude);
    }

    if cli.route.is_some() {
        if planned.len() < 2 {
            warn!("Planned route has {} points, nothing to split", planned.len());
        }

        let split = reconciler.compute_progress(&planned);
        let done = geo_utils::polyline_length(&split.completed);
        let left = geo_utils::polyline_length(&split.remaining);

        println!("\nPlanned route ({} points):", planned.len());
        println!("  Completed: {} points, {:.1} km", split.completed.len(), done / 1000.0);
        println!("  Remaining: {} points, {:.1} km", split.remaining.len(), left / 1000.0);
        if done + left > 0.0 {
            println!("  Progress:  {:.0}%", 100.0 * done / (done + left));
        }
    }

    Ok(())
}
