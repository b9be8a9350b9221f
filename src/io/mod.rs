//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `catalog_source` - Zone catalog fetch (HTTP or file) and periodic refresh
//! - `location` - Device and simulated location feeds, operator commands
//! - `alert_channel` - Typed channel from detection to the notification worker
//! - `egress` - Notification output to file (JSONL format)
//! - `http_notify` - Notification POST to an HTTP endpoint
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod alert_channel;
pub mod catalog_source;
pub mod egress;
pub mod http_notify;
pub mod location;
pub mod prometheus;

// Re-export commonly used types
pub use alert_channel::{create_alert_channel, AlertSender};
pub use catalog_source::{create_catalog_refresher, CatalogRefresher, CatalogSource};
pub use egress::AlertEgress;
pub use http_notify::HttpNotifier;
pub use location::{run_operator_commands, spawn_stdin_reader, LocationFeed, SampleSender, SimulatedTaps};
