//! Zone catalog source and periodic refresher
//!
//! The catalog is fetched over HTTP or read from a local file, parsed into a new
//! snapshot, and swapped into the shared `CatalogHandle`. A failed fetch leaves the
//! previous snapshot in place and is retried on the next tick.

use crate::domain::catalog::{CatalogHandle, ZoneCatalog};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Where zone documents come from
pub enum CatalogSource {
    Http { client: reqwest::Client, url: String },
    File(PathBuf),
}

impl CatalogSource {
    /// Source selected by config; url wins over file
    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        if let Some(url) = config.catalog_url() {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.catalog_request_timeout_ms()))
                .build()
                .context("Failed to build HTTP client")?;
            return Ok(Some(CatalogSource::Http { client, url: url.to_string() }));
        }
        Ok(config.catalog_file().map(|path| CatalogSource::File(PathBuf::from(path))))
    }

    /// Human-readable location for logs
    pub fn describe(&self) -> String {
        match self {
            CatalogSource::Http { url, .. } => url.clone(),
            CatalogSource::File(path) => path.display().to_string(),
        }
    }

    /// Fetch and parse one snapshot
    pub async fn load(&self) -> anyhow::Result<ZoneCatalog> {
        let bytes = match self {
            CatalogSource::Http { client, url } => {
                let response = client
                    .get(url)
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .with_context(|| format!("GET {url} failed"))?
                    .error_for_status()
                    .with_context(|| format!("GET {url} returned an error status"))?;
                response.bytes().await.with_context(|| format!("Failed to read body from {url}"))?.to_vec()
            }
            CatalogSource::File(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read zone file {}", path.display()))?,
        };

        ZoneCatalog::from_json(&bytes)
    }
}

/// Periodically reloads the catalog into a shared handle
pub struct CatalogRefresher {
    source: CatalogSource,
    handle: CatalogHandle,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl CatalogRefresher {
    pub fn new(
        source: CatalogSource,
        handle: CatalogHandle,
        interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { source, handle, interval, metrics }
    }

    /// Load once and swap on success; returns whether the swap happened
    pub async fn refresh_once(&self) -> bool {
        let start = Instant::now();
        match self.source.load().await {
            Ok(catalog) => {
                let zones = catalog.len();
                let rejected = catalog.rejected();
                self.metrics.record_catalog_refresh(zones, rejected);
                let generation = self.handle.replace(catalog);
                info!(
                    source = %self.source.describe(),
                    generation = %generation,
                    zones = %zones,
                    rejected = %rejected,
                    latency_ms = %start.elapsed().as_millis(),
                    "catalog_refreshed"
                );
                true
            }
            Err(e) => {
                self.metrics.record_catalog_failure();
                error!(
                    source = %self.source.describe(),
                    error = %format!("{e:#}"),
                    kept_zones = %self.handle.snapshot().len(),
                    "catalog_refresh_failed"
                );
                false
            }
        }
    }

    /// Refresh every interval until shutdown; the initial load is the caller's `refresh_once`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.source.describe(),
            interval_secs = %self.interval.as_secs(),
            "catalog_refresher_started"
        );

        let first = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("catalog_refresher_shutdown");
                        return;
                    }
                }
            }
        }
    }
}

/// Build the refresher for the configured source, if any
pub fn create_catalog_refresher(
    config: &Config,
    handle: CatalogHandle,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Option<CatalogRefresher>> {
    let Some(source) = CatalogSource::from_config(config)? else {
        warn!("catalog_source_not_configured");
        return Ok(None);
    };
    let interval = Duration::from_secs(config.catalog_refresh_interval_secs().max(1));
    Ok(Some(CatalogRefresher::new(source, handle, interval, metrics)))
}
