//! Domain models - zones, locations, transitions and alerts
//!
//! This module contains the canonical data types used throughout the system:
//! - `Zone` - a named polygon with a bounding box and per-mode risk
//! - `ZoneCatalog` - immutable snapshot of every usable zone plus its spatial index
//! - `CatalogHandle` - atomically swappable reference to the current snapshot
//! - `LocationSample` - one position observation, real or simulated
//! - `TransitionEvent` - Entered / Exited a zone
//! - `ZoneAlert` - user-facing notification payload for a transition

pub mod alert;
pub mod catalog;
pub mod types;

// Re-export commonly used types at module level
pub use alert::{AlertKind, Notification, ZoneAlert};
pub use catalog::{CatalogHandle, ZoneCatalog};
pub use types::{
    BoundingBox, LocationSample, Point, RiskLevel, SampleSource, TransitionEvent, TravelMode, Zone,
    ZoneId,
};
