//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Samples handed to the detection task (monotonic)
    samples_received: AtomicU64,
    /// Samples with out-of-range or non-finite coordinates (monotonic)
    samples_invalid: AtomicU64,
    /// Samples denied by the throttle gate (monotonic)
    samples_throttled: AtomicU64,
    /// Samples dropped because the sample queue was full (monotonic)
    samples_dropped: AtomicU64,
    /// Completed detection cycles (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle latencies in microseconds (reset on report)
    cycle_latency_sum_us: AtomicU64,
    /// Max cycle latency in microseconds (reset on report)
    cycle_latency_max_us: AtomicU64,
    /// Cycle latency histogram buckets (reset on report)
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Zones surviving both prefilters (monotonic)
    candidates_total: AtomicU64,
    /// Exact point-in-polygon tests run (monotonic)
    exact_tests_total: AtomicU64,
    /// Size of the last nearby working set (gauge)
    nearby_zones: AtomicU64,
    /// Entered transitions (monotonic)
    zones_entered: AtomicU64,
    /// Exited transitions (monotonic)
    zones_exited: AtomicU64,
    /// Alerts dropped because the dispatcher queue was full (monotonic)
    alerts_dropped: AtomicU64,
    /// Sink deliveries that succeeded (monotonic)
    notifications_delivered: AtomicU64,
    /// Sink deliveries that failed (monotonic)
    notifications_failed: AtomicU64,
    /// Successful catalog loads (monotonic)
    catalog_refreshes: AtomicU64,
    /// Failed catalog loads (monotonic)
    catalog_failures: AtomicU64,
    /// Zones in the current snapshot (gauge)
    zones_loaded: AtomicU64,
    /// Records rejected by the last successful load (gauge)
    zones_rejected: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_invalid: AtomicU64::new(0),
            samples_throttled: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_latency_sum_us: AtomicU64::new(0),
            cycle_latency_max_us: AtomicU64::new(0),
            cycle_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            candidates_total: AtomicU64::new(0),
            exact_tests_total: AtomicU64::new(0),
            nearby_zones: AtomicU64::new(0),
            zones_entered: AtomicU64::new(0),
            zones_exited: AtomicU64::new(0),
            alerts_dropped: AtomicU64::new(0),
            notifications_delivered: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            catalog_refreshes: AtomicU64::new(0),
            catalog_failures: AtomicU64::new(0),
            zones_loaded: AtomicU64::new(0),
            zones_rejected: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_invalid(&self) {
        self.samples_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_throttled(&self) {
        self.samples_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample dropped due to channel full (lock-free)
    #[inline]
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed detection cycle (lock-free)
    ///
    /// `candidates` is the size of the index/nearby intersection, `exact_tests` the
    /// number of ring tests run before a hit (or all of them on a miss).
    #[inline]
    pub fn record_cycle(&self, latency_us: u64, candidates: usize, exact_tests: usize, nearby: usize) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.cycle_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.cycle_latency_max_us, latency_us);

        self.candidates_total.fetch_add(candidates as u64, Ordering::Relaxed);
        self.exact_tests_total.fetch_add(exact_tests as u64, Ordering::Relaxed);
        self.nearby_zones.store(nearby as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_entered(&self) {
        self.zones_entered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_exited(&self) {
        self.zones_exited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an alert dropped due to channel full (lock-free)
    #[inline]
    pub fn record_alert_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one sink delivery outcome
    #[inline]
    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a successful catalog load and set the zone gauges
    pub fn record_catalog_refresh(&self, zones: usize, rejected: usize) {
        self.catalog_refreshes.fetch_add(1, Ordering::Relaxed);
        self.zones_loaded.store(zones as u64, Ordering::Relaxed);
        self.zones_rejected.store(rejected as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_catalog_failure(&self) {
        self.catalog_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_throttled(&self) -> u64 {
        self.samples_throttled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn samples_invalid(&self) -> u64 {
        self.samples_invalid.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zones_entered(&self) -> u64 {
        self.zones_entered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zones_exited(&self) -> u64 {
        self.zones_exited.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_delivered(&self) -> u64 {
        self.notifications_delivered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn catalog_failures(&self) -> u64 {
        self.catalog_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zones_loaded(&self) -> u64 {
        self.zones_loaded.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.cycle_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.cycle_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.cycle_latency_buckets);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let cycles_per_sec = if elapsed.as_secs_f64() > 0.0 {
            cycles_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if cycles_count > 0 { latency_sum / cycles_count } else { 0 };

        MetricsSummary {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_invalid: self.samples_invalid.load(Ordering::Relaxed),
            samples_throttled: self.samples_throttled.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_sec,
            avg_cycle_latency_us: avg_latency,
            max_cycle_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            candidates_total: self.candidates_total.load(Ordering::Relaxed),
            exact_tests_total: self.exact_tests_total.load(Ordering::Relaxed),
            nearby_zones: self.nearby_zones.load(Ordering::Relaxed),
            zones_entered: self.zones_entered.load(Ordering::Relaxed),
            zones_exited: self.zones_exited.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            catalog_refreshes: self.catalog_refreshes.load(Ordering::Relaxed),
            catalog_failures: self.catalog_failures.load(Ordering::Relaxed),
            zones_loaded: self.zones_loaded.load(Ordering::Relaxed),
            zones_rejected: self.zones_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the Prometheus endpoint)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub samples_received: u64,
    pub samples_invalid: u64,
    pub samples_throttled: u64,
    pub samples_dropped: u64,
    pub cycles_total: u64,
    pub cycles_per_sec: f64,
    pub avg_cycle_latency_us: u64,
    pub max_cycle_latency_us: u64,
    /// Cycle latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub candidates_total: u64,
    pub exact_tests_total: u64,
    /// Size of the last nearby working set
    pub nearby_zones: u64,
    pub zones_entered: u64,
    pub zones_exited: u64,
    pub alerts_dropped: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub catalog_refreshes: u64,
    pub catalog_failures: u64,
    /// Zones in the current snapshot
    pub zones_loaded: u64,
    /// Records rejected by the last successful load
    pub zones_rejected: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples = %self.samples_received,
            throttled = %self.samples_throttled,
            dropped = %self.samples_dropped,
            invalid = %self.samples_invalid,
            cycles = %self.cycles_total,
            cycles_per_sec = format!("{:.2}", self.cycles_per_sec),
            avg_cycle_us = %self.avg_cycle_latency_us,
            p99_us = %self.lat_p99_us,
            nearby = %self.nearby_zones,
            entered = %self.zones_entered,
            exited = %self.zones_exited,
            notify_ok = %self.notifications_delivered,
            notify_err = %self.notifications_failed,
            zones = %self.zones_loaded,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.samples_received(), 0);
        assert_eq!(metrics.cycles_total(), 0);
    }

    #[test]
    fn test_record_cycle() {
        let metrics = Metrics::new();

        metrics.record_cycle(100, 2, 1, 3);
        assert_eq!(metrics.cycles_total(), 1);
        assert_eq!(metrics.cycle_latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_cycle(200, 1, 1, 2);
        assert_eq!(metrics.cycles_total(), 2);
        assert_eq!(metrics.cycle_latency_sum_us.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.candidates_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.nearby_zones.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_cycle(100, 0, 0, 0);
        metrics.record_cycle(200, 0, 0, 0);
        metrics.record_cycle(300, 0, 0, 0);
        metrics.record_zone_entered();
        metrics.record_notification(true);
        metrics.record_notification(false);
        metrics.record_catalog_refresh(12, 2);

        let summary = metrics.report();

        assert_eq!(summary.cycles_total, 3);
        assert_eq!(summary.avg_cycle_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_cycle_latency_us, 300);
        assert_eq!(summary.zones_entered, 1);
        assert_eq!(summary.notifications_delivered, 1);
        assert_eq!(summary.notifications_failed, 1);
        assert_eq!(summary.zones_loaded, 12);
        assert_eq!(summary.zones_rejected, 2);

        // Periodic counters should be reset
        assert_eq!(metrics.cycles_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cycle_latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cycle_latency_max_us.load(Ordering::Relaxed), 0);
        // Monotonic counters are not
        assert_eq!(metrics.cycles_total(), 3);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report();

        assert_eq!(summary.cycles_total, 0);
        assert_eq!(summary.avg_cycle_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_sample_received();
                    m.record_sample_dropped();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.samples_received(), 10_000);
        assert_eq!(metrics.samples_dropped(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // 100 cycles, all at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_cycle(150, 0, 0, 0);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_buckets[1], 100);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
