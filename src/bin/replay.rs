//! Zone Replay - offline transition replay
//!
//! Runs a recorded sample track through a fresh detection engine against a zone
//! catalog file and prints every resulting alert as a JSON line on stdout.
//! Logs go to stderr so stdout stays machine-readable.
//!
//! Usage:
//!   zone-replay --zones zones.json --samples track.jsonl
//!   zone-replay --zones zones.json --samples track.jsonl --mode car --throttle-ms 0
//!
//! Sample lines: {"lat": 55.67, "lon": 12.56, "ts": 1700000000000, "simulated": false}

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use zone_alert::domain::{TravelMode, ZoneCatalog};
use zone_alert::services::replay::{parse_samples, replay};
use zone_alert::services::DetectionEngine;

/// Zone Replay - run recorded samples through the detection engine
#[derive(Parser, Debug)]
#[command(name = "zone-replay", version, about, long_about = None)]
struct Args {
    /// Zone catalog JSON (processedZones envelope or bare array)
    #[arg(short, long)]
    zones: String,

    /// JSONL file of recorded samples
    #[arg(short, long)]
    samples: String,

    /// Travel mode selecting which risk attribute alerts report
    #[arg(short, long, default_value = "pedestrian")]
    mode: TravelMode,

    /// Minimum time between detection cycles, in sample time
    #[arg(short, long, default_value_t = 5000)]
    throttle_ms: u64,

    /// Nearby working-set radius
    #[arg(short, long, default_value_t = 1.0)]
    radius_km: f64,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let zones = std::fs::read(&args.zones)
        .with_context(|| format!("Failed to read zone file {}", args.zones))?;
    let catalog = ZoneCatalog::from_json(&zones)?;

    let content = std::fs::read_to_string(&args.samples)
        .with_context(|| format!("Failed to read sample file {}", args.samples))?;
    let samples = parse_samples(&content)?;

    let mut engine = DetectionEngine::new(Duration::from_millis(args.throttle_ms), args.mode);
    let (alerts, stats) = replay(&mut engine, &catalog, &samples, args.radius_km);

    for alert in &alerts {
        println!("{}", alert.to_json());
    }

    info!(
        zones = %catalog.len(),
        rejected = %catalog.rejected(),
        samples = %stats.samples,
        cycles = %stats.cycles,
        throttled = %stats.throttled,
        skipped = %stats.skipped,
        alerts = %alerts.len(),
        "replay_complete"
    );
    Ok(())
}
