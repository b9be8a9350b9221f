//! Zone catalog snapshots and ingestion
//!
//! Raw zone records arrive in several coordinate shapes. They are normalized here,
//! once, into canonical `Zone`s; nothing downstream branches on input shape.
//!
//! Canonical convention for array vertices is `[lon, lat]` (GeoJSON order).
//! Object vertices are read by key (`lat` with `lon` or `lng`). A provided bbox
//! uses X = lon, Y = lat.

use crate::domain::types::{BoundingBox, Point, RiskLevel, TravelMode, Zone, ZoneId};
use crate::geo::membership::open_ring;
use crate::geo::{check_bbox, check_geometry, SpatialIndex, ZoneRejection};
use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// One vertex as found in source data
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVertex {
    /// `[lon, lat]`
    Pair(Vec<f64>),
    Object {
        lat: f64,
        #[serde(alias = "lng")]
        lon: f64,
    },
}

impl RawVertex {
    fn to_point(&self) -> Option<Point> {
        match self {
            RawVertex::Pair(coords) if coords.len() >= 2 => Some(Point::new(coords[1], coords[0])),
            RawVertex::Pair(_) => None,
            RawVertex::Object { lat, lon } => Some(Point::new(*lat, *lon)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBbox {
    #[serde(rename = "minX", alias = "minLon")]
    min_x: f64,
    #[serde(rename = "maxX", alias = "maxLon")]
    max_x: f64,
    #[serde(rename = "minY", alias = "minLat")]
    min_y: f64,
    #[serde(rename = "maxY", alias = "maxLat")]
    max_y: f64,
}

impl RawBbox {
    fn to_bbox(&self) -> BoundingBox {
        BoundingBox::new(self.min_y, self.max_y, self.min_x, self.max_x)
    }
}

/// Risk attribute: numeric score or an explicit level name
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRisk {
    Score(f64),
    Level(String),
}

impl RawRisk {
    fn to_level(&self) -> Option<RiskLevel> {
        match self {
            RawRisk::Score(score) if score.is_finite() => Some(RiskLevel::from_score(*score)),
            RawRisk::Score(_) => None,
            RawRisk::Level(name) => name.parse().ok(),
        }
    }
}

/// Zone record as served by the zones endpoint
#[derive(Debug, Deserialize)]
pub struct RawZone {
    #[serde(rename = "zoneId", alias = "id", default)]
    zone_id: Option<serde_json::Value>,
    #[serde(rename = "type", alias = "kind", default)]
    kind: Option<String>,
    #[serde(default)]
    geometry: Vec<RawVertex>,
    #[serde(default)]
    bbox: Option<RawBbox>,
    #[serde(default)]
    car: Option<RawRisk>,
    #[serde(default)]
    pedestrian: Option<RawRisk>,
    #[serde(rename = "currentRisk", default)]
    current_risk: Option<RawRisk>,
}

impl RawZone {
    /// Id as a string; numeric ids are stringified
    fn id(&self) -> Option<String> {
        match self.zone_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn risk_by_mode(&self) -> FxHashMap<TravelMode, RiskLevel> {
        let fallback = self.current_risk.as_ref().and_then(RawRisk::to_level);
        let mut risk = FxHashMap::default();
        for mode in TravelMode::ALL {
            let explicit = match mode {
                TravelMode::Car => self.car.as_ref(),
                TravelMode::Pedestrian => self.pedestrian.as_ref(),
            };
            if let Some(level) = explicit.and_then(RawRisk::to_level).or(fallback) {
                risk.insert(mode, level);
            }
        }
        risk
    }

    /// Normalize into a canonical zone
    pub fn normalize(self) -> Result<Zone, ZoneRejection> {
        let id = self.id().ok_or(ZoneRejection::MissingId)?;

        let ring: Vec<Point> = self
            .geometry
            .iter()
            .map(|v| v.to_point().filter(Point::is_valid))
            .collect::<Option<_>>()
            .ok_or(ZoneRejection::InvalidVertex)?;

        if open_ring(&ring).len() < 3 {
            return Err(ZoneRejection::RingTooShort);
        }

        let extent = BoundingBox::from_points(&ring).ok_or(ZoneRejection::RingTooShort)?;
        let bbox = match &self.bbox {
            Some(raw) => {
                let provided = raw.to_bbox();
                check_bbox(&provided)?;
                // Never narrower than the ring, so the index cannot miss a containing zone
                provided.union(&extent)
            }
            None => extent,
        };

        let zone = Zone {
            id: ZoneId(id),
            kind: self.kind.clone().unwrap_or_default(),
            risk_by_mode: self.risk_by_mode(),
            ring,
            bbox,
        };
        check_geometry(&zone)?;
        Ok(zone)
    }
}

/// Top-level document: `{ "processedZones": [...] }` or a bare array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Envelope {
        #[serde(rename = "processedZones", alias = "zones")]
        processed_zones: Vec<serde_json::Value>,
    },
    Bare(Vec<serde_json::Value>),
}

/// Immutable snapshot of every usable zone
///
/// Zone order is source order and defines the tie-break when zones overlap.
#[derive(Debug)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
    by_id: FxHashMap<ZoneId, usize>,
    index: SpatialIndex,
    rejected: usize,
}

impl ZoneCatalog {
    pub fn empty() -> Self {
        Self {
            zones: Vec::new(),
            by_id: FxHashMap::default(),
            index: SpatialIndex::new(),
            rejected: 0,
        }
    }

    /// Build a snapshot from zones, dropping malformed ones and duplicate ids
    pub fn from_zones(zones: Vec<Zone>) -> Self {
        Self::assemble(zones.into_iter().map(Ok))
    }

    /// Parse a zones document (envelope or bare array)
    ///
    /// A document that is not JSON or has the wrong top-level shape is an error.
    /// Individual bad records are rejected and logged; the rest load.
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let document: CatalogDocument =
            serde_json::from_slice(bytes).context("Failed to parse zone catalog document")?;
        let records = match document {
            CatalogDocument::Envelope { processed_zones } => processed_zones,
            CatalogDocument::Bare(records) => records,
        };

        let zones = records.into_iter().enumerate().map(|(i, value)| {
            match serde_json::from_value::<RawZone>(value) {
                Ok(raw) => {
                    let label = raw.id().unwrap_or_else(|| format!("#{i}"));
                    raw.normalize().map_err(|reason| (label, reason))
                }
                Err(e) => {
                    warn!(record = %i, error = %e, "zone_record_malformed");
                    Err((format!("#{i}"), ZoneRejection::MalformedRecord))
                }
            }
        });
        Ok(Self::assemble(zones))
    }

    fn assemble<I>(results: I) -> Self
    where
        I: Iterator<Item = Result<Zone, (String, ZoneRejection)>>,
    {
        let mut zones = Vec::new();
        let mut by_id = FxHashMap::default();
        let mut rejected = 0;

        for result in results {
            let zone = match result.and_then(|z| match check_geometry(&z) {
                Ok(()) => Ok(z),
                Err(reason) => Err((z.id.to_string(), reason)),
            }) {
                Ok(zone) => zone,
                Err((label, reason)) => {
                    warn!(zone_id = %label, reason = %reason, "zone_rejected");
                    rejected += 1;
                    continue;
                }
            };

            if by_id.contains_key(&zone.id) {
                warn!(zone_id = %zone.id, reason = %ZoneRejection::DuplicateId, "zone_rejected");
                rejected += 1;
                continue;
            }
            by_id.insert(zone.id.clone(), zones.len());
            zones.push(zone);
        }

        let index = SpatialIndex::build(&zones);
        Self { zones, by_id, index, rejected }
    }

    /// Zones in catalog order
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, id: &ZoneId) -> Option<&Zone> {
        self.by_id.get(id).map(|&pos| &self.zones[pos])
    }

    /// Catalog position of a zone
    pub fn position(&self, id: &ZoneId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Records dropped while building this snapshot
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl Default for ZoneCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shared, atomically swappable reference to the current catalog snapshot
///
/// Readers take an `Arc` for the duration of a detection cycle; a refresh swaps the
/// reference and never touches a snapshot a reader already holds.
#[derive(Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<ZoneCatalog>>>,
    generation: Arc<AtomicU64>,
}

impl CatalogHandle {
    pub fn new(catalog: ZoneCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<ZoneCatalog> {
        self.current.read().clone()
    }

    /// Swap in a new snapshot, returning its generation number
    pub fn replace(&self, catalog: ZoneCatalog) -> u64 {
        let zones = catalog.len();
        let rejected = catalog.rejected();
        let next = Arc::new(catalog);
        *self.current.write() = next;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation = %generation, zones = %zones, rejected = %rejected, "catalog_replaced");
        generation
    }

    /// Number of replacements so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(ZoneCatalog::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "processedZones": [
            {
                "zoneId": "Z1",
                "type": "school",
                "geometry": [[-7.38, 33.69], [-7.37, 33.69], [-7.37, 33.70], [-7.38, 33.70]],
                "bbox": {"minX": -7.38, "maxX": -7.37, "minY": 33.69, "maxY": 33.70},
                "car": 20,
                "pedestrian": 80
            },
            {
                "zoneId": 42,
                "type": "market",
                "geometry": [{"lat": 33.71, "lng": -7.36}, {"lat": 33.71, "lng": -7.35}, {"lat": 33.72, "lng": -7.35}],
                "bbox": null,
                "currentRisk": "medium"
            },
            {
                "zoneId": "bad-ring",
                "type": "park",
                "geometry": [[-7.0, 33.0], [-7.1, 33.1]]
            },
            {
                "zoneId": "bad-bbox",
                "type": "park",
                "geometry": [[-7.0, 33.0], [-7.1, 33.0], [-7.1, 33.1]],
                "bbox": {"minX": -7.0, "maxX": -7.1, "minY": 33.0, "maxY": 33.1}
            },
            {
                "zoneId": "Z1",
                "type": "duplicate",
                "geometry": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]
            },
            { "zoneId": "garbage", "geometry": "nope" }
        ]
    }"#;

    #[test]
    fn test_from_json_envelope() {
        let catalog = ZoneCatalog::from_json(DOC.as_bytes()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.rejected(), 4);

        let ids: Vec<&str> = catalog.zones().iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["Z1", "42"]);
        assert_eq!(catalog.index().len(), 2);
    }

    #[test]
    fn test_array_vertices_are_lon_lat() {
        let catalog = ZoneCatalog::from_json(DOC.as_bytes()).unwrap();
        let z1 = catalog.get(&ZoneId::new("Z1")).unwrap();

        assert_eq!(z1.ring[0], Point::new(33.69, -7.38));
        assert_eq!(z1.bbox, BoundingBox::new(33.69, 33.70, -7.38, -7.37));
    }

    #[test]
    fn test_object_vertices_and_risk() {
        let catalog = ZoneCatalog::from_json(DOC.as_bytes()).unwrap();
        let market = catalog.get(&ZoneId::new("42")).unwrap();
        assert_eq!(market.ring[0], Point::new(33.71, -7.36));
        assert_eq!(market.risk_for(TravelMode::Car), Some(RiskLevel::Medium));

        let z1 = catalog.get(&ZoneId::new("Z1")).unwrap();
        assert_eq!(z1.kind, "school");
        assert_eq!(z1.risk_for(TravelMode::Car), Some(RiskLevel::Low));
        assert_eq!(z1.risk_for(TravelMode::Pedestrian), Some(RiskLevel::High));
    }

    #[test]
    fn test_bare_array_document() {
        let doc = r#"[{"zoneId": "a", "type": "t", "geometry": [[0,0],[1,0],[1,1],[0,1],[0,0]]}]"#;
        let catalog = ZoneCatalog::from_json(doc.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.position(&ZoneId::new("a")), Some(0));
    }

    #[test]
    fn test_bbox_widened_to_ring() {
        let doc = r#"[{"zoneId": "a", "type": "t",
            "geometry": [[0,0],[2,0],[2,2],[0,2]],
            "bbox": {"minX": 0.5, "maxX": 1.0, "minY": 0.5, "maxY": 1.0}}]"#;
        let catalog = ZoneCatalog::from_json(doc.as_bytes()).unwrap();
        let zone = &catalog.zones()[0];
        assert_eq!(zone.bbox, BoundingBox::new(0.0, 2.0, 0.0, 2.0));
    }

    #[test]
    fn test_invalid_document_is_error() {
        assert!(ZoneCatalog::from_json(b"not json").is_err());
        assert!(ZoneCatalog::from_json(br#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_handle_swaps_snapshot() {
        let handle = CatalogHandle::default();
        let before = handle.snapshot();
        assert!(before.is_empty());

        let doc = r#"[{"zoneId": "a", "type": "t", "geometry": [[0,0],[1,0],[1,1]]}]"#;
        let generation = handle.replace(ZoneCatalog::from_json(doc.as_bytes()).unwrap());

        assert_eq!(generation, 1);
        assert_eq!(handle.generation(), 1);
        // A snapshot taken earlier is untouched
        assert!(before.is_empty());
        assert_eq!(handle.snapshot().len(), 1);
    }
}
