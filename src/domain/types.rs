//! Shared types for zone detection

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Newtype wrapper for zone IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical geographic point (degrees)
///
/// Every external ordering (`[lon, lat]` arrays, `{lat, lon}` / `{lat, lng}` objects) is
/// converted to this shape once, when the catalog or a location fix is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    #[inline]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the WGS84 coordinate range
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Axis-aligned box in lat/lon space. Containment is inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub const fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self { min_lat, max_lat, min_lon, max_lon }
    }

    /// Smallest box enclosing every point, or None for an empty slice
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::new(first.lat, first.lat, first.lon, first.lon);
        for p in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lon = bbox.max_lon.max(p.lon);
        }
        Some(bbox)
    }

    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lon.is_finite()
    }

    /// min > max on either axis
    pub fn is_inverted(&self) -> bool {
        self.min_lat > self.max_lat || self.min_lon > self.max_lon
    }

    /// Zero width or zero height
    pub fn is_degenerate(&self) -> bool {
        self.min_lat == self.max_lat || self.min_lon == self.max_lon
    }
}

/// Travel mode selecting which risk attribute applies to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    #[default]
    Pedestrian,
    Car,
}

impl TravelMode {
    pub const ALL: [TravelMode; 2] = [TravelMode::Pedestrian, TravelMode::Car];

    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Pedestrian => "pedestrian",
            TravelMode::Car => "car",
        }
    }
}

impl std::str::FromStr for TravelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pedestrian" => Ok(TravelMode::Pedestrian),
            "car" => Ok(TravelMode::Car),
            other => Err(format!("unknown travel mode: {other}")),
        }
    }
}

/// Risk score thresholds (inclusive upper bounds)
const RISK_LOW_MAX: f64 = 33.0;
const RISK_MEDIUM_MAX: f64 = 66.0;

/// Risk classification attached to a zone per travel mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Classify a numeric risk score (0..=100)
    pub fn from_score(score: f64) -> Self {
        if score <= RISK_LOW_MAX {
            RiskLevel::Low
        } else if score <= RISK_MEDIUM_MAX {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// A geofenced zone, owned by a `ZoneCatalog` snapshot
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: ZoneId,
    /// Classification from the source (e.g. "school", "construction")
    pub kind: String,
    /// Vertex ring in source winding order, possibly open
    pub ring: Vec<Point>,
    /// Superset of the ring's extent
    pub bbox: BoundingBox,
    pub risk_by_mode: FxHashMap<TravelMode, RiskLevel>,
}

impl Zone {
    pub fn risk_for(&self, mode: TravelMode) -> Option<RiskLevel> {
        self.risk_by_mode.get(&mode).copied()
    }
}

/// Where a location sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Real,
    Simulated,
}

impl SampleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSource::Real => "real",
            SampleSource::Simulated => "simulated",
        }
    }
}

/// A single location observation fed into detection
#[derive(Debug, Clone, Copy)]
pub struct LocationSample {
    pub point: Point,
    pub timestamp: Instant,
    pub source: SampleSource,
}

impl LocationSample {
    pub fn new(point: Point, timestamp: Instant, source: SampleSource) -> Self {
        Self { point, timestamp, source }
    }

    /// Real sample stamped now
    pub fn real(point: Point) -> Self {
        Self::new(point, Instant::now(), SampleSource::Real)
    }

    /// Simulated sample stamped now
    pub fn simulated(point: Point) -> Self {
        Self::new(point, Instant::now(), SampleSource::Simulated)
    }
}

/// Zone transition emitted by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    Entered(ZoneId),
    Exited(ZoneId),
}

impl TransitionEvent {
    pub fn zone_id(&self) -> &ZoneId {
        match self {
            TransitionEvent::Entered(id) | TransitionEvent::Exited(id) => id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionEvent::Entered(_) => "entered",
            TransitionEvent::Exited(_) => "exited",
        }
    }
}
