//! Zone detection engine and its task
//!
//! One detection cycle per admitted sample:
//! - Validate the point and consult the throttle gate
//! - Prune with the bounding-box index and the nearby working set (both on the full catalog)
//! - Run the exact ring test over the surviving candidates in catalog order
//! - Feed the first hit (or none) to the transition tracker
//! - Enrich resulting events into alerts
//!
//! The engine is owned by a single task and driven through `&mut self`.


use crate::domain::alert::ZoneAlert;
use crate::domain::catalog::{CatalogHandle, ZoneCatalog};
use crate::domain::types::{LocationSample, TransitionEvent, TravelMode, Zone, ZoneId};
use crate::geo::{membership, nearby};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alert_channel::AlertSender;
use crate::services::throttle::ThrottleGate;
use crate::services::transition::{TransitionEvents, TransitionTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Why a sample produced no cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Coordinates non-finite or outside the WGS84 range
    InvalidPoint,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidPoint => "invalid_point",
        }
    }
}

/// Result of feeding one sample to the engine
#[derive(Debug)]
pub enum DetectionOutcome {
    /// Denied by the throttle gate; nothing changed
    Throttled,
    /// Rejected before the throttle; nothing changed
    Skipped(SkipReason),
    /// A cycle ran
    Completed {
        /// Zone occupied after the cycle
        current: Option<ZoneId>,
        /// Transitions committed by this cycle
        events: TransitionEvents,
        /// Events enriched for notification, same order as `events`
        alerts: Vec<ZoneAlert>,
        /// Nearby working set, catalog order
        nearby: Vec<ZoneId>,
    },
}

/// Work done by the last completed cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Zones passing both prefilters
    pub candidates: usize,
    /// Exact ring tests run
    pub exact_tests: usize,
    /// Size of the nearby working set
    pub nearby: usize,
}

/// Owns throttle and transition state for one tracked subject
pub struct DetectionEngine {
    throttle: ThrottleGate,
    tracker: TransitionTracker,
    /// Selects the risk attribute reported in alerts
    mode: TravelMode,
    /// Zone record as it was when entered; enriches the exit if a refresh dropped it
    entered_zone: Option<Zone>,
    last_stats: CycleStats,
}

impl DetectionEngine {
    pub fn new(throttle_interval: Duration, mode: TravelMode) -> Self {
        Self {
            throttle: ThrottleGate::new(throttle_interval),
            tracker: TransitionTracker::new(),
            mode,
            entered_zone: None,
            last_stats: CycleStats::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Duration::from_millis(config.throttle_interval_ms()), config.travel_mode())
    }

    /// Zone currently occupied
    pub fn current(&self) -> Option<&ZoneId> {
        self.tracker.current()
    }

    pub fn mode(&self) -> TravelMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TravelMode) {
        self.mode = mode;
    }

    pub fn last_stats(&self) -> CycleStats {
        self.last_stats
    }

    /// Run one detection cycle for `sample` against `catalog`
    pub fn on_sample(
        &mut self,
        sample: &LocationSample,
        catalog: &ZoneCatalog,
        radius_km: f64,
    ) -> DetectionOutcome {
        let point = sample.point;

        // Invalid input never consumes the throttle window
        if !point.is_valid() {
            return DetectionOutcome::Skipped(SkipReason::InvalidPoint);
        }

        if !self.throttle.allow(sample.timestamp) {
            return DetectionOutcome::Throttled;
        }

        let zones = catalog.zones();

        // Nearby working set over the full catalog, catalog order
        let nearby_positions = nearby::filter_positions(&point, zones, radius_km);

        // Index hits (ascending) that are also nearby
        let candidates: Vec<usize> = catalog
            .index()
            .query_positions(&point)
            .into_iter()
            .filter(|pos| nearby_positions.binary_search(pos).is_ok())
            .collect();

        let mut exact_tests = 0;
        let new_zone = candidates.iter().map(|&pos| &zones[pos]).find(|zone| {
            exact_tests += 1;
            membership::contains(&zone.ring, &point)
        });
        let new_zone_id = new_zone.map(|zone| zone.id.clone());

        self.last_stats = CycleStats {
            candidates: candidates.len(),
            exact_tests,
            nearby: nearby_positions.len(),
        };

        let events = self.tracker.update(new_zone_id);
        let alerts = self.enrich(&events, catalog, sample);

        DetectionOutcome::Completed {
            current: self.tracker.current().cloned(),
            events,
            alerts,
            nearby: nearby_positions.iter().map(|&pos| zones[pos].id.clone()).collect(),
        }
    }

    /// Build alerts for committed events and remember the zone entered
    fn enrich(
        &mut self,
        events: &TransitionEvents,
        catalog: &ZoneCatalog,
        sample: &LocationSample,
    ) -> Vec<ZoneAlert> {
        let mut alerts = Vec::with_capacity(events.len());

        for event in events {
            let alert = match event {
                TransitionEvent::Exited(id) => {
                    let remembered = self.entered_zone.take().filter(|zone| &zone.id == id);
                    let zone = catalog.get(id).or(remembered.as_ref());
                    ZoneAlert::from_transition(event, zone, self.mode, sample.source, sample.point)
                }
                TransitionEvent::Entered(id) => {
                    self.entered_zone = catalog.get(id).cloned();
                    ZoneAlert::from_transition(
                        event,
                        self.entered_zone.as_ref(),
                        self.mode,
                        sample.source,
                        sample.point,
                    )
                }
            };
            alerts.push(alert);
        }

        alerts
    }
}

/// Task owning the engine, fed by the sample queue
pub struct DetectionTask {
    engine: DetectionEngine,
    catalog: CatalogHandle,
    radius_km: f64,
    sample_rx: mpsc::Receiver<LocationSample>,
    alert_tx: AlertSender,
    metrics: Arc<Metrics>,
}

impl DetectionTask {
    pub fn new(
        engine: DetectionEngine,
        catalog: CatalogHandle,
        radius_km: f64,
        sample_rx: mpsc::Receiver<LocationSample>,
        alert_tx: AlertSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { engine, catalog, radius_km, sample_rx, alert_tx, metrics }
    }

    /// Process samples until shutdown or until every sender is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = %self.engine.mode().as_str(),
            radius_km = %self.radius_km,
            "detection_task_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                sample = self.sample_rx.recv() => {
                    match sample {
                        Some(s) => self.process(&s),
                        None => break, // Channel closed
                    }
                }
            }
        }

        info!(current_zone = ?self.engine.current(), "detection_task_stopped");
    }

    /// Run one sample through the engine and queue resulting alerts
    pub fn process(&mut self, sample: &LocationSample) {
        let started = Instant::now();
        self.metrics.record_sample_received();

        // Held for the whole cycle; a concurrent refresh only affects the next one
        let catalog = self.catalog.snapshot();

        match self.engine.on_sample(sample, &catalog, self.radius_km) {
            DetectionOutcome::Skipped(reason) => {
                self.metrics.record_sample_invalid();
                warn!(
                    lat = %sample.point.lat,
                    lon = %sample.point.lon,
                    reason = %reason.as_str(),
                    "sample_skipped"
                );
            }
            DetectionOutcome::Throttled => {
                self.metrics.record_sample_throttled();
                debug!(src = %sample.source.as_str(), "sample_throttled");
            }
            DetectionOutcome::Completed { current, events, alerts, nearby } => {
                let latency_us = started.elapsed().as_micros() as u64;
                let stats = self.engine.last_stats();
                self.metrics.record_cycle(latency_us, stats.candidates, stats.exact_tests, stats.nearby);

                debug!(
                    lat = %sample.point.lat,
                    lon = %sample.point.lon,
                    src = %sample.source.as_str(),
                    current_zone = ?current,
                    nearby = %nearby.len(),
                    candidates = %stats.candidates,
                    exact_tests = %stats.exact_tests,
                    latency_us = %latency_us,
                    "detection_cycle"
                );

                for event in &events {
                    match event {
                        TransitionEvent::Entered(id) => {
                            self.metrics.record_zone_entered();
                            info!(zone_id = %id, src = %sample.source.as_str(), "zone_entered");
                        }
                        TransitionEvent::Exited(id) => {
                            self.metrics.record_zone_exited();
                            info!(zone_id = %id, src = %sample.source.as_str(), "zone_exited");
                        }
                    }
                }

                // State is committed; delivery is fire-and-forget
                for alert in alerts {
                    self.alert_tx.send(alert);
                }
            }
        }
    }

    pub fn engine(&self) -> &DetectionEngine {
        &self.engine
    }
}

/// Create the sample channel and the detection task
///
/// Returns the sender (for location feeds) and the task (to be spawned)
pub fn create_detection_task(
    config: &Config,
    catalog: CatalogHandle,
    alert_tx: AlertSender,
    metrics: Arc<Metrics>,
) -> (mpsc::Sender<LocationSample>, DetectionTask) {
    let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue_capacity());
    let task = DetectionTask::new(
        DetectionEngine::from_config(config),
        catalog,
        config.nearby_radius_km(),
        sample_rx,
        alert_tx,
        metrics,
    );
    (sample_tx, task)
}
