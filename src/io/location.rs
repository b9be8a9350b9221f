//! Location sources feeding the detection task
//!
//! Two variants produce the same `LocationSample` shape:
//! - Device: newline-delimited JSON fixes read from a file or FIFO, passed through
//!   a device-side time/distance filter
//! - Simulated: operator taps, one sample per tap
//!
//! Only one source is live at a time. Switching mode disposes the previous one
//! (device task aborted, tap handle deactivated) before the next starts.

use crate::domain::alert::epoch_ms;
use crate::domain::types::{LocationSample, Point};
use crate::geo::nearby::haversine_km;
use crate::infra::config::{Config, LocationMode};
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Producer side of the sample queue; drops when the detection task is busy
#[derive(Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<LocationSample>,
    metrics: Arc<Metrics>,
}

impl SampleSender {
    pub fn new(tx: mpsc::Sender<LocationSample>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Returns false if the sample was dropped
    pub fn send(&self, sample: LocationSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_sample_dropped();
                debug!(src = %sample.source.as_str(), "sample_dropped_queue_full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_sample_dropped();
                warn!("sample_dropped_detection_closed");
                false
            }
        }
    }
}

/// A decoded device fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceFix {
    pub point: Point,
    /// Fix time in epoch ms, if the device supplied one
    pub ts: Option<u64>,
}

#[derive(Deserialize)]
struct RawCoords {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFix {
    Nested {
        coords: RawCoords,
        #[serde(default, alias = "timestamp")]
        ts: Option<u64>,
    },
    Flat {
        lat: f64,
        #[serde(alias = "lng")]
        lon: f64,
        #[serde(default, alias = "timestamp")]
        ts: Option<u64>,
    },
}

/// Decode one NDJSON fix line
pub fn parse_fix(line: &str) -> anyhow::Result<DeviceFix> {
    let raw: RawFix = serde_json::from_str(line).context("Unrecognized fix shape")?;
    Ok(match raw {
        RawFix::Nested { coords, ts } => DeviceFix { point: Point::new(coords.latitude, coords.longitude), ts },
        RawFix::Flat { lat, lon, ts } => DeviceFix { point: Point::new(lat, lon), ts },
    })
}

/// Device-side watch filter: forward a fix only after enough time and movement
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    min_interval_ms: u64,
    min_distance_m: f64,
    last: Option<(u64, Point)>,
}

impl DeviceFilter {
    pub fn new(min_interval_ms: u64, min_distance_m: f64) -> Self {
        Self { min_interval_ms, min_distance_m, last: None }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.device_min_time_interval_ms(), config.device_min_distance_m())
    }

    /// First fix always passes; later ones need both thresholds met against the
    /// last committed fix
    pub fn admits(&self, ts_ms: u64, point: &Point) -> bool {
        match self.last {
            Some((last_ts, last_point)) => {
                let elapsed = ts_ms.saturating_sub(last_ts);
                let moved_m = haversine_km(&last_point, point) * 1000.0;
                elapsed >= self.min_interval_ms && moved_m >= self.min_distance_m
            }
            None => true,
        }
    }

    /// Record a fix that was actually forwarded
    pub fn commit(&mut self, ts_ms: u64, point: Point) {
        self.last = Some((ts_ms, point));
    }
}

/// Read fixes until EOF, pacing by their timestamps
pub async fn run_device_feed(path: PathBuf, mut filter: DeviceFilter, sender: SampleSender) {
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            error!(path = %path.display(), error = %e, "device_feed_open_failed");
            return;
        }
    };
    info!(path = %path.display(), "device_feed_started");

    let mut lines = BufReader::new(file).lines();
    let mut prev_ts: Option<u64> = None;
    let mut forwarded = 0u64;
    let mut filtered = 0u64;
    let mut dropped = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(path = %path.display(), error = %e, "device_feed_read_failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let fix = match parse_fix(&line) {
            Ok(fix) => fix,
            Err(e) => {
                warn!(error = %e, "device_fix_malformed");
                continue;
            }
        };

        // Recorded tracks replay at their original pace
        if let (Some(prev), Some(ts)) = (prev_ts, fix.ts) {
            let gap = ts.saturating_sub(prev);
            if gap > 0 {
                tokio::time::sleep(Duration::from_millis(gap)).await;
            }
        }
        if fix.ts.is_some() {
            prev_ts = fix.ts;
        }

        let ts_ms = fix.ts.unwrap_or_else(epoch_ms);
        if !filter.admits(ts_ms, &fix.point) {
            filtered += 1;
            continue;
        }
        // A dropped fix never becomes the reference for the next one
        if sender.send(LocationSample::real(fix.point)) {
            filter.commit(ts_ms, fix.point);
            forwarded += 1;
        } else {
            dropped += 1;
        }
    }

    info!(forwarded = %forwarded, filtered = %filtered, dropped = %dropped, "device_feed_ended");
}

/// Handle through which operator taps become samples
#[derive(Clone)]
pub struct SimulatedTaps {
    active: Arc<AtomicBool>,
    sender: SampleSender,
}

impl SimulatedTaps {
    pub fn new(sender: SampleSender) -> Self {
        Self { active: Arc::new(AtomicBool::new(true)), sender }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting taps; clones see it too
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Emit one simulated sample now
    pub fn tap(&self, point: Point) -> bool {
        if !self.is_active() {
            debug!("tap_ignored_inactive");
            return false;
        }
        self.sender.send(LocationSample::simulated(point))
    }
}

/// The live location source
pub enum LocationSource {
    Device { task: Option<JoinHandle<()>> },
    Simulated(SimulatedTaps),
}

impl LocationSource {
    pub fn mode(&self) -> LocationMode {
        match self {
            LocationSource::Device { .. } => LocationMode::Device,
            LocationSource::Simulated(_) => LocationMode::Simulated,
        }
    }

    /// Release the source so it can no longer deliver samples
    pub fn dispose(self) {
        match self {
            LocationSource::Device { task: Some(task) } => task.abort(),
            LocationSource::Device { task: None } => {}
            LocationSource::Simulated(taps) => taps.deactivate(),
        }
    }
}

/// Owns the current location source and switches between modes
pub struct LocationFeed {
    sender: SampleSender,
    device_feed: Option<PathBuf>,
    filter: DeviceFilter,
    current: Option<LocationSource>,
}

impl LocationFeed {
    pub fn new(sender: SampleSender, device_feed: Option<PathBuf>, filter: DeviceFilter) -> Self {
        Self { sender, device_feed, filter, current: None }
    }

    pub fn from_config(config: &Config, sender: SampleSender) -> Self {
        Self::new(
            sender,
            config.device_feed().map(PathBuf::from),
            DeviceFilter::from_config(config),
        )
    }

    pub fn mode(&self) -> Option<LocationMode> {
        self.current.as_ref().map(|s| s.mode())
    }

    /// Dispose the current source and start one for `mode`
    ///
    /// Must be called from within a tokio runtime (device mode spawns a task).
    pub fn switch_to(&mut self, mode: LocationMode) {
        if let Some(previous) = self.current.take() {
            previous.dispose();
        }

        let source = match mode {
            LocationMode::Device => {
                let task = match &self.device_feed {
                    Some(path) => Some(tokio::spawn(run_device_feed(
                        path.clone(),
                        self.filter.clone(),
                        self.sender.clone(),
                    ))),
                    None => {
                        warn!("device_feed_not_configured");
                        None
                    }
                };
                LocationSource::Device { task }
            }
            LocationMode::Simulated => LocationSource::Simulated(SimulatedTaps::new(self.sender.clone())),
        };

        info!(mode = %mode.as_str(), "location_mode_switched");
        self.current = Some(source);
    }

    /// Tap handle while in simulated mode
    pub fn taps(&self) -> Option<&SimulatedTaps> {
        match &self.current {
            Some(LocationSource::Simulated(taps)) => Some(taps),
            _ => None,
        }
    }

    pub fn stop(&mut self) {
        if let Some(source) = self.current.take() {
            source.dispose();
        }
    }
}

impl Drop for LocationFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Operator command read from stdin
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    Tap(Point),
    SimOn,
    SimOff,
}

pub fn parse_command(line: &str) -> anyhow::Result<OperatorCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["tap", lat, lon] => {
            let lat: f64 = lat.parse().with_context(|| format!("Invalid latitude '{lat}'"))?;
            let lon: f64 = lon.parse().with_context(|| format!("Invalid longitude '{lon}'"))?;
            Ok(OperatorCommand::Tap(Point::new(lat, lon)))
        }
        ["sim", "on"] => Ok(OperatorCommand::SimOn),
        ["sim", "off"] => Ok(OperatorCommand::SimOff),
        _ => bail!("Unknown command '{}' (expected: tap <lat> <lon> | sim on | sim off)", line.trim()),
    }
}

/// Apply one command to the feed
pub fn apply_command(feed: &mut LocationFeed, command: OperatorCommand) {
    match command {
        OperatorCommand::SimOn => feed.switch_to(LocationMode::Simulated),
        OperatorCommand::SimOff => feed.switch_to(LocationMode::Device),
        OperatorCommand::Tap(point) => match feed.taps() {
            Some(taps) => {
                let queued = taps.tap(point);
                info!(lat = %point.lat, lon = %point.lon, queued = %queued, "tap");
            }
            None => warn!("tap_ignored_not_simulating"),
        },
    }
}

/// Forward stdin lines from a dedicated thread
///
/// A blocking stdin read cannot be cancelled, so it stays off the runtime; the
/// thread ends at EOF or once the receiver is gone.
pub fn spawn_stdin_reader(buffer: usize) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(buffer);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Apply operator command lines until input closes or shutdown
pub async fn run_operator_commands(
    mut lines: mpsc::Receiver<String>,
    mut feed: LocationFeed,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            line = lines.recv() => {
                match line {
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_command(&line) {
                            Ok(command) => apply_command(&mut feed, command),
                            Err(e) => warn!(error = %e, "operator_command_invalid"),
                        }
                    }
                    None => {
                        info!("operator_input_closed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Input closing does not stop the live source
    if !*shutdown.borrow() {
        let _ = shutdown.wait_for(|stop| *stop).await;
    }
    feed.stop();
    info!("location_feed_shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sender(capacity: usize) -> (SampleSender, mpsc::Receiver<LocationSample>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let (tx, rx) = mpsc::channel(capacity);
        (SampleSender::new(tx, metrics.clone()), rx, metrics)
    }

    #[test]
    fn test_parse_fix_shapes() {
        let a = parse_fix(r#"{"lat": 1.5, "lon": 2.5}"#).unwrap();
        assert_eq!(a.point, Point::new(1.5, 2.5));
        assert_eq!(a.ts, None);

        let b = parse_fix(r#"{"lat": 1.5, "lng": 2.5, "ts": 1000}"#).unwrap();
        assert_eq!(b.point, Point::new(1.5, 2.5));
        assert_eq!(b.ts, Some(1000));

        let c = parse_fix(r#"{"coords": {"latitude": -3.0, "longitude": 4.0}, "timestamp": 7}"#).unwrap();
        assert_eq!(c.point, Point::new(-3.0, 4.0));
        assert_eq!(c.ts, Some(7));

        assert!(parse_fix(r#"{"x": 1}"#).is_err());
        assert!(parse_fix("not json").is_err());
    }

    #[test]
    fn test_device_filter_requires_time_and_distance() {
        let mut filter = DeviceFilter::new(5000, 10.0);
        let origin = Point::new(0.0, 0.0);
        // ~111 m north
        let moved = Point::new(0.001, 0.0);

        assert!(filter.admits(0, &origin));
        filter.commit(0, origin);
        assert!(!filter.admits(6000, &origin), "no movement");
        assert!(!filter.admits(1000, &moved), "too soon");
        assert!(filter.admits(6000, &moved));
        filter.commit(6000, moved);
        // ~1 m further is below the distance threshold
        assert!(!filter.admits(20_000, &Point::new(0.00101, 0.0)));
    }

    #[test]
    fn test_device_filter_measures_from_committed_fix() {
        let mut filter = DeviceFilter::new(5000, 10.0);
        let origin = Point::new(0.0, 0.0);
        let moved = Point::new(0.001, 0.0);

        filter.commit(0, origin);
        // Admitted but never committed (e.g. dropped on a full queue)
        assert!(filter.admits(6000, &moved));
        // Still measured against the origin, not against `moved`
        assert!(filter.admits(7000, &Point::new(0.00101, 0.0)));
    }

    #[tokio::test]
    async fn test_dropped_fix_does_not_suppress_next() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"lat": 0.0, "lon": 0.0, "ts": 0}}"#).unwrap();
        writeln!(file, r#"{{"lat": 0.0, "lon": 0.0, "ts": 300}}"#).unwrap();
        file.flush().unwrap();

        // Queue already full when the first fix arrives
        let (tx, mut rx, metrics) = sender(1);
        assert!(tx.send(LocationSample::simulated(Point::new(9.0, 9.0))));
        let feed = tokio::spawn(run_device_feed(file.path().to_path_buf(), DeviceFilter::new(10, 10.0), tx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.point, Point::new(9.0, 9.0));

        // Same position as the dropped fix, yet forwarded
        let second = rx.recv().await.unwrap();
        assert_eq!(second.point, Point::new(0.0, 0.0));
        feed.await.unwrap();
        assert_eq!(metrics.samples_dropped(), 1);
    }

    #[test]
    fn test_sample_sender_counts_drops() {
        let (tx, _rx, metrics) = sender(1);
        assert!(tx.send(LocationSample::real(Point::new(0.0, 0.0))));
        assert!(!tx.send(LocationSample::real(Point::new(0.0, 0.0))));
        assert_eq!(metrics.samples_dropped(), 1);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("tap 0.5 -1.25").unwrap(), OperatorCommand::Tap(Point::new(0.5, -1.25)));
        assert_eq!(parse_command("  sim on ").unwrap(), OperatorCommand::SimOn);
        assert_eq!(parse_command("sim off").unwrap(), OperatorCommand::SimOff);
        assert!(parse_command("tap x 1").is_err());
        assert!(parse_command("tap 1").is_err());
        assert!(parse_command("fly").is_err());
    }

    #[tokio::test]
    async fn test_taps_stop_after_deactivate() {
        let (tx, mut rx, _) = sender(8);
        let taps = SimulatedTaps::new(tx);
        let held = taps.clone();

        assert!(held.tap(Point::new(1.0, 1.0)));
        taps.deactivate();
        assert!(!held.tap(Point::new(2.0, 2.0)));

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.point, Point::new(1.0, 1.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_device_feed_filters_and_forwards() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"lat": 0.0, "lon": 0.0, "ts": 0}}"#).unwrap();
        writeln!(file, r#"{{"lat": 0.0, "lon": 0.0, "ts": 20}}"#).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, r#"{{"lat": 0.001, "lng": 0.0, "ts": 40}}"#).unwrap();
        file.flush().unwrap();

        let (tx, mut rx, _) = sender(8);
        run_device_feed(file.path().to_path_buf(), DeviceFilter::new(10, 10.0), tx).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.point, Point::new(0.0, 0.0));
        assert_eq!(second.point, Point::new(0.001, 0.0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_switching_disposes_previous_source() {
        let (tx, mut rx, _) = sender(8);
        let mut feed = LocationFeed::new(tx, None, DeviceFilter::new(0, 0.0));

        feed.switch_to(LocationMode::Simulated);
        assert_eq!(feed.mode(), Some(LocationMode::Simulated));
        let stale = feed.taps().unwrap().clone();
        apply_command(&mut feed, OperatorCommand::Tap(Point::new(0.5, 0.5)));

        apply_command(&mut feed, OperatorCommand::SimOff);
        assert_eq!(feed.mode(), Some(LocationMode::Device));
        assert!(feed.taps().is_none());
        assert!(!stale.tap(Point::new(9.0, 9.0)));

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.source, crate::domain::types::SampleSource::Simulated);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_operator_commands_drive_feed() {
        let (tx, mut rx, _) = sender(8);
        let mut feed = LocationFeed::new(tx, None, DeviceFilter::new(0, 0.0));
        feed.switch_to(LocationMode::Device);

        let (line_tx, line_rx) = mpsc::channel(8);
        for line in ["tap 1 1", "sim on", "", "tap 0.5 0.5", "bogus"] {
            line_tx.send(line.to_string()).await.unwrap();
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_operator_commands(line_rx, feed, shutdown_rx));

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.point, Point::new(0.5, 0.5));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
        drop(line_tx);
    }

    #[tokio::test]
    async fn test_shutdown_with_operator_input_still_open() {
        let (tx, mut rx, _) = sender(8);
        let mut feed = LocationFeed::new(tx, None, DeviceFilter::new(0, 0.0));
        feed.switch_to(LocationMode::Simulated);

        // Writer side stays open and silent, like an interactive terminal
        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_operator_commands(line_rx, feed, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

        assert!(rx.recv().await.is_none());
        // Reader side released, so the stdin thread stops on its next line
        assert!(line_tx.is_closed());
    }

    #[tokio::test]
    async fn test_closed_input_keeps_feed_until_shutdown() {
        let (tx, mut rx, _) = sender(8);
        let mut feed = LocationFeed::new(tx, None, DeviceFilter::new(0, 0.0));
        feed.switch_to(LocationMode::Simulated);

        let (line_tx, line_rx) = mpsc::channel::<String>(8);
        drop(line_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_operator_commands(line_rx, feed, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
    }
}
