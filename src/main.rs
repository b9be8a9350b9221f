//! Zone Alert - geofence transition notifier
//!
//! Detects entry into and exit from risk-annotated zones from a live device feed
//! or operator-simulated taps, and delivers a notification per transition.
//!
//! Module structure:
//! - `domain/` - Core types (Zone, Point, ZoneCatalog, alerts)
//! - `geo/` - Spatial index, nearby filter, ring membership
//! - `io/` - External interfaces (catalog source, location feeds, sinks, Prometheus)
//! - `services/` - Detection engine, transition tracker, throttle, dispatcher
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use zone_alert::domain::CatalogHandle;
use zone_alert::infra::{Config, Metrics};
use zone_alert::io::{
    create_catalog_refresher, run_operator_commands, spawn_stdin_reader, LocationFeed, SampleSender,
};
use zone_alert::services::{create_detection_task, create_dispatcher};

/// Zone Alert - geofence transition notifier
#[derive(Parser, Debug)]
#[command(name = "zone-alert", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

/// Grace period for blocking reads (device FIFO) still parked at shutdown
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-cycle visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %option_env!("GIT_HASH").unwrap_or("unknown"), "zone-alert starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        catalog_url = ?config.catalog_url(),
        catalog_file = ?config.catalog_file(),
        refresh_interval_secs = %config.catalog_refresh_interval_secs(),
        throttle_interval_ms = %config.throttle_interval_ms(),
        nearby_radius_km = %config.nearby_radius_km(),
        travel_mode = %config.travel_mode().as_str(),
        location_mode = %config.location_mode().as_str(),
        device_feed = ?config.device_feed(),
        notify_url = ?config.notify_url(),
        egress_file = %config.egress_file(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let catalog = CatalogHandle::default();

    // Initial load before any sample is processed; the refresher keeps retrying on failure
    match create_catalog_refresher(&config, catalog.clone(), metrics.clone())? {
        Some(refresher) => {
            refresher.refresh_once().await;
            let refresh_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                refresher.run(refresh_shutdown).await;
            });
        }
        None => info!("running_with_empty_catalog"),
    }

    // Notification worker
    let (alert_tx, dispatcher) = create_dispatcher(&config, metrics.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    // Detection task (sole owner of the engine)
    let (sample_tx, detection) = create_detection_task(&config, catalog.clone(), alert_tx, metrics.clone());
    let detection_handle = tokio::spawn(detection.run(shutdown_rx.clone()));

    // Location feed in the configured mode, switchable from stdin
    let mut feed = LocationFeed::from_config(&config, SampleSender::new(sample_tx, metrics.clone()));
    feed.switch_to(config.location_mode());
    let commands_shutdown = shutdown_rx.clone();
    let feed_handle = tokio::spawn(run_operator_commands(spawn_stdin_reader(16), feed, commands_shutdown));

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_catalog = catalog.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = zone_alert::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_catalog,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Feed drops its sender on shutdown, detection then drops the alert sender,
    // which lets the dispatcher drain and stop
    let _ = feed_handle.await;
    let _ = detection_handle.await;
    let _ = dispatcher_handle.await;

    metrics.report().log();
    info!("zone-alert shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test so the CONFIG_FILE mutations never race another test in this binary
    #[test]
    fn test_config_path_sources() {
        std::env::remove_var("CONFIG_FILE");
        let args = Args::try_parse_from(["zone-alert"]).unwrap();
        assert_eq!(args.config, "config/dev.toml");

        std::env::set_var("CONFIG_FILE", "config/site.toml");
        let args = Args::try_parse_from(["zone-alert"]).unwrap();
        assert_eq!(args.config, "config/site.toml");

        // Explicit flag wins over the environment
        let args = Args::try_parse_from(["zone-alert", "--config=config/other.toml"]).unwrap();
        assert_eq!(args.config, "config/other.toml");
        std::env::remove_var("CONFIG_FILE");
    }
}
