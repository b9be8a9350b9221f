//! Zone alert library
//!
//! Geofence transition detection over a refreshable zone catalog.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod geo;
pub mod infra;
pub mod io;
pub mod services;
