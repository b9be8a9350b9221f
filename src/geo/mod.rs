//! Geometry - spatial pruning and exact containment
//!
//! - `spatial_index` - R-tree of zone bounding boxes (prefilter, no false negatives)
//! - `nearby` - haversine radius filter over zone centroids (working set)
//! - `membership` - exact point-in-polygon test
//!
//! `check_geometry` is the single definition of a well-formed zone; both catalog
//! ingestion and index building apply it.

pub mod membership;
pub mod nearby;
pub mod spatial_index;

pub use spatial_index::SpatialIndex;

use crate::domain::types::{BoundingBox, Zone};

/// Reason a zone record was excluded from a catalog or index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneRejection {
    MissingId,
    DuplicateId,
    RingTooShort,
    InvalidVertex,
    InvalidBbox,
    InvertedBbox,
    DegenerateBbox,
    BboxExcludesRing,
    MalformedRecord,
}

impl ZoneRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneRejection::MissingId => "missing_id",
            ZoneRejection::DuplicateId => "duplicate_id",
            ZoneRejection::RingTooShort => "ring_too_short",
            ZoneRejection::InvalidVertex => "invalid_vertex",
            ZoneRejection::InvalidBbox => "invalid_bbox",
            ZoneRejection::InvertedBbox => "inverted_bbox",
            ZoneRejection::DegenerateBbox => "degenerate_bbox",
            ZoneRejection::BboxExcludesRing => "bbox_excludes_ring",
            ZoneRejection::MalformedRecord => "malformed_record",
        }
    }
}

impl std::fmt::Display for ZoneRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a bounding box on its own
pub fn check_bbox(bbox: &BoundingBox) -> Result<(), ZoneRejection> {
    if !bbox.is_finite() {
        return Err(ZoneRejection::InvalidBbox);
    }
    if bbox.is_inverted() {
        return Err(ZoneRejection::InvertedBbox);
    }
    if bbox.is_degenerate() {
        return Err(ZoneRejection::DegenerateBbox);
    }
    Ok(())
}

/// Validate ring and bbox of a zone
pub fn check_geometry(zone: &Zone) -> Result<(), ZoneRejection> {
    if zone.id.as_str().is_empty() {
        return Err(ZoneRejection::MissingId);
    }
    if zone.ring.iter().any(|p| !p.is_valid()) {
        return Err(ZoneRejection::InvalidVertex);
    }
    if membership::open_ring(&zone.ring).len() < 3 {
        return Err(ZoneRejection::RingTooShort);
    }
    check_bbox(&zone.bbox)?;
    if !zone.ring.iter().all(|p| zone.bbox.contains(p)) {
        return Err(ZoneRejection::BboxExcludesRing);
    }
    Ok(())
}
