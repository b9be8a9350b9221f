//! Prometheus metrics HTTP endpoint
//!
//! Exposes detection metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::domain::catalog::CatalogHandle;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_sample_metrics(&mut output, site_id, &summary);
    write_cycle_metrics(&mut output, site_id, &summary);
    write_transition_metrics(&mut output, site_id, &summary);
    write_catalog_metrics(&mut output, site_id, &summary);

    output
}

fn write_sample_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "zone_alert_samples_total",
        "Location samples received by the detection task",
        MetricType::Counter,
        site,
        summary.samples_received,
    );
    write_metric(
        output,
        "zone_alert_samples_invalid_total",
        "Samples skipped for invalid coordinates",
        MetricType::Counter,
        site,
        summary.samples_invalid,
    );
    write_metric(
        output,
        "zone_alert_samples_throttled_total",
        "Samples denied by the throttle gate",
        MetricType::Counter,
        site,
        summary.samples_throttled,
    );
    write_metric(
        output,
        "zone_alert_samples_dropped_total",
        "Samples dropped because the sample queue was full",
        MetricType::Counter,
        site,
        summary.samples_dropped,
    );
}

fn write_cycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "zone_alert_cycles_total",
        "Detection cycles completed",
        MetricType::Counter,
        site,
        summary.cycles_total,
    );
    write_histogram(
        output,
        "zone_alert_cycle_latency_us",
        "Detection cycle latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_cycle_latency_us,
    );
    write_metric(
        output,
        "zone_alert_candidates_total",
        "Zones passing both the index and the nearby filter",
        MetricType::Counter,
        site,
        summary.candidates_total,
    );
    write_metric(
        output,
        "zone_alert_exact_tests_total",
        "Exact point-in-polygon tests run",
        MetricType::Counter,
        site,
        summary.exact_tests_total,
    );
    write_metric(
        output,
        "zone_alert_nearby_zones",
        "Size of the last nearby working set",
        MetricType::Gauge,
        site,
        summary.nearby_zones,
    );
}

fn write_transition_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "zone_alert_zones_entered_total",
        "Entered transitions",
        MetricType::Counter,
        site,
        summary.zones_entered,
    );
    write_metric(
        output,
        "zone_alert_zones_exited_total",
        "Exited transitions",
        MetricType::Counter,
        site,
        summary.zones_exited,
    );
    write_metric(
        output,
        "zone_alert_alerts_dropped_total",
        "Alerts dropped because the dispatcher queue was full",
        MetricType::Counter,
        site,
        summary.alerts_dropped,
    );
    write_metric(
        output,
        "zone_alert_notifications_delivered_total",
        "Sink deliveries that succeeded",
        MetricType::Counter,
        site,
        summary.notifications_delivered,
    );
    write_metric(
        output,
        "zone_alert_notifications_failed_total",
        "Sink deliveries that failed",
        MetricType::Counter,
        site,
        summary.notifications_failed,
    );
}

fn write_catalog_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "zone_alert_catalog_refreshes_total",
        "Successful zone catalog loads",
        MetricType::Counter,
        site,
        summary.catalog_refreshes,
    );
    write_metric(
        output,
        "zone_alert_catalog_failures_total",
        "Failed zone catalog loads",
        MetricType::Counter,
        site,
        summary.catalog_failures,
    );
    write_metric(
        output,
        "zone_alert_zones_loaded",
        "Zones in the current catalog snapshot",
        MetricType::Gauge,
        site,
        summary.zones_loaded,
    );
    write_metric(
        output,
        "zone_alert_zones_rejected",
        "Zone records rejected by the last catalog load",
        MetricType::Gauge,
        site,
        summary.zones_rejected,
    );
}

/// Health body: build, catalog generation and zone count
fn health_body(catalog: &CatalogHandle) -> String {
    let snapshot = catalog.snapshot();
    format!(
        r#"{{"ok":true,"version":"{}","catalog_generation":{},"zones":{}}}"#,
        option_env!("GIT_HASH").unwrap_or("unknown"),
        catalog.generation(),
        snapshot.len()
    )
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
    catalog: CatalogHandle,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(health_body(&catalog))))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    catalog: CatalogHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();
                        let catalog = catalog.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                let catalog = catalog.clone();
                                async move { handle_request(req, metrics, site_id, catalog).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
