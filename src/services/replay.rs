//! Offline replay of recorded samples through a fresh engine
//!
//! Sample timestamps (epoch ms) are mapped onto a synthetic `Instant` timeline so
//! the throttle behaves as it did when the samples were recorded.

use crate::domain::alert::ZoneAlert;
use crate::domain::catalog::ZoneCatalog;
use crate::domain::types::{LocationSample, Point, SampleSource};
use crate::services::engine::{DetectionEngine, DetectionOutcome};
use anyhow::Context;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// One recorded sample line
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RecordedSample {
    pub lat: f64,
    #[serde(alias = "lng")]
    pub lon: f64,
    /// Epoch ms
    pub ts: u64,
    #[serde(default)]
    pub simulated: bool,
}

/// Parse JSONL content, reporting the first bad line by number
pub fn parse_samples(content: &str) -> anyhow::Result<Vec<RecordedSample>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid sample on line {}", i + 1))
        })
        .collect()
}

/// Counters from one replay run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub samples: usize,
    pub cycles: usize,
    pub throttled: usize,
    pub skipped: usize,
}

/// Run every sample through `engine`; alerts carry the sample's own timestamp
pub fn replay(
    engine: &mut DetectionEngine,
    catalog: &ZoneCatalog,
    samples: &[RecordedSample],
    radius_km: f64,
) -> (Vec<ZoneAlert>, ReplayStats) {
    let mut alerts = Vec::new();
    let mut stats = ReplayStats::default();
    let base = Instant::now();
    let first_ts = samples.first().map(|s| s.ts).unwrap_or(0);

    for recorded in samples {
        stats.samples += 1;
        // Earlier-than-first timestamps collapse onto the base instant
        let offset = Duration::from_millis(recorded.ts.saturating_sub(first_ts));
        let source = if recorded.simulated { SampleSource::Simulated } else { SampleSource::Real };
        let sample = LocationSample::new(Point::new(recorded.lat, recorded.lon), base + offset, source);

        match engine.on_sample(&sample, catalog, radius_km) {
            DetectionOutcome::Throttled => stats.throttled += 1,
            DetectionOutcome::Skipped(_) => stats.skipped += 1,
            DetectionOutcome::Completed { alerts: cycle_alerts, .. } => {
                stats.cycles += 1;
                alerts.extend(cycle_alerts.into_iter().map(|mut alert| {
                    alert.ts = recorded.ts;
                    alert
                }));
            }
        }
    }

    (alerts, stats)
}
