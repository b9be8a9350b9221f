//! Configuration loading from TOML files
//!
//! The binary takes the path from `--config` or the CONFIG_FILE environment
//! variable (default config/dev.toml). A missing or unparsable file falls back
//! to defaults.
//!
//! Every section and key has a default, so a partial file is valid.

use crate::domain::types::TravelMode;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Where location samples come from at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    #[default]
    Device,
    Simulated,
}

impl LocationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationMode::Device => "device",
            LocationMode::Simulated => "simulated",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Identifier attached to outgoing notifications
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "zone-alert".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Zones endpoint (HTTP GET)
    #[serde(default)]
    pub url: Option<String>,
    /// Local zones document, used when no url is set
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_request_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Minimum spacing between detection cycles
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
    /// Radius of the nearby working set
    #[serde(default = "default_nearby_radius_km")]
    pub nearby_radius_km: f64,
    /// Selects which risk attribute alerts report
    #[serde(default)]
    pub travel_mode: TravelMode,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: default_throttle_interval_ms(),
            nearby_radius_km: default_nearby_radius_km(),
            travel_mode: TravelMode::default(),
        }
    }
}

fn default_throttle_interval_ms() -> u64 {
    5000
}

fn default_nearby_radius_km() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default)]
    pub mode: LocationMode,
    /// NDJSON file of device fixes
    #[serde(default)]
    pub device_feed: Option<String>,
    #[serde(default = "default_min_time_interval_ms")]
    pub min_time_interval_ms: u64,
    #[serde(default = "default_min_distance_m")]
    pub min_distance_m: f64,
    /// Sample queue depth in front of the detection task
    #[serde(default = "default_location_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            mode: LocationMode::default(),
            device_feed: None,
            min_time_interval_ms: default_min_time_interval_ms(),
            min_distance_m: default_min_distance_m(),
            queue_capacity: default_location_queue_capacity(),
        }
    }
}

fn default_min_time_interval_ms() -> u64 {
    5000
}

fn default_min_distance_m() -> f64 {
    10.0
}

fn default_location_queue_capacity() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Optional HTTP endpoint receiving a POST per alert
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
    /// File path for alert egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub egress_file: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_notify_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_notify_timeout_ms(),
            egress_file: default_egress_file(),
            title: default_title(),
            queue_capacity: default_notify_queue_capacity(),
        }
    }
}

fn default_notify_timeout_ms() -> u64 {
    3000
}

fn default_egress_file() -> String {
    "notifications.jsonl".to_string()
}

fn default_title() -> String {
    "Zone Alert".to_string()
}

fn default_notify_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    catalog_url: Option<String>,
    catalog_file: Option<String>,
    catalog_refresh_interval_secs: u64,
    catalog_request_timeout_ms: u64,
    throttle_interval_ms: u64,
    nearby_radius_km: f64,
    travel_mode: TravelMode,
    location_mode: LocationMode,
    device_feed: Option<String>,
    device_min_time_interval_ms: u64,
    device_min_distance_m: f64,
    sample_queue_capacity: usize,
    notify_url: Option<String>,
    notify_timeout_ms: u64,
    egress_file: String,
    notify_title: String,
    notify_queue_capacity: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            catalog_url: toml_config.catalog.url,
            catalog_file: toml_config.catalog.file,
            catalog_refresh_interval_secs: toml_config.catalog.refresh_interval_secs,
            catalog_request_timeout_ms: toml_config.catalog.request_timeout_ms,
            throttle_interval_ms: toml_config.detection.throttle_interval_ms,
            nearby_radius_km: toml_config.detection.nearby_radius_km,
            travel_mode: toml_config.detection.travel_mode,
            location_mode: toml_config.location.mode,
            device_feed: toml_config.location.device_feed,
            device_min_time_interval_ms: toml_config.location.min_time_interval_ms,
            device_min_distance_m: toml_config.location.min_distance_m,
            // A zero-capacity mpsc channel panics
            sample_queue_capacity: toml_config.location.queue_capacity.max(1),
            notify_url: toml_config.notifications.url,
            notify_timeout_ms: toml_config.notifications.timeout_ms,
            egress_file: toml_config.notifications.egress_file,
            notify_title: toml_config.notifications.title,
            notify_queue_capacity: toml_config.notifications.queue_capacity.max(1),
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.catalog.url.is_some() && toml_config.catalog.file.is_some() {
            warn!(config_file = %path.display(), "catalog_url_and_file_set_using_url");
        }

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn catalog_url(&self) -> Option<&str> {
        self.catalog_url.as_deref()
    }

    pub fn catalog_file(&self) -> Option<&str> {
        self.catalog_file.as_deref()
    }

    pub fn catalog_refresh_interval_secs(&self) -> u64 {
        self.catalog_refresh_interval_secs
    }

    pub fn catalog_request_timeout_ms(&self) -> u64 {
        self.catalog_request_timeout_ms
    }

    pub fn throttle_interval_ms(&self) -> u64 {
        self.throttle_interval_ms
    }

    pub fn nearby_radius_km(&self) -> f64 {
        self.nearby_radius_km
    }

    pub fn travel_mode(&self) -> TravelMode {
        self.travel_mode
    }

    pub fn location_mode(&self) -> LocationMode {
        self.location_mode
    }

    pub fn device_feed(&self) -> Option<&str> {
        self.device_feed.as_deref()
    }

    pub fn device_min_time_interval_ms(&self) -> u64 {
        self.device_min_time_interval_ms
    }

    pub fn device_min_distance_m(&self) -> f64 {
        self.device_min_distance_m
    }

    pub fn sample_queue_capacity(&self) -> usize {
        self.sample_queue_capacity
    }

    pub fn notify_url(&self) -> Option<&str> {
        self.notify_url.as_deref()
    }

    pub fn notify_timeout_ms(&self) -> u64 {
        self.notify_timeout_ms
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn notify_title(&self) -> &str {
        &self.notify_title
    }

    pub fn notify_queue_capacity(&self) -> usize {
        self.notify_queue_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the throttle interval
    pub fn with_throttle_interval_ms(mut self, ms: u64) -> Self {
        self.throttle_interval_ms = ms;
        self
    }

    /// Builder method for tests to set the travel mode
    pub fn with_travel_mode(mut self, mode: TravelMode) -> Self {
        self.travel_mode = mode;
        self
    }

    /// Builder method for tests to point egress at a temp file
    pub fn with_egress_file(mut self, path: impl Into<String>) -> Self {
        self.egress_file = path.into();
        self
    }
}
