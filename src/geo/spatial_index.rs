//! Bounding-box index over a zone catalog
//!
//! R-tree of zone boxes keyed by catalog position. Built wholesale from a zone slice
//! (a catalog refresh builds a new index rather than patching the old one). Queries
//! are a prefilter: a hit only means the point lies inside the zone's box.

use crate::domain::types::{Point, Zone, ZoneId};
use crate::geo::check_geometry;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

/// Back-reference into the catalog: position and id, never a zone copy
#[derive(Debug, Clone, PartialEq)]
struct ZoneRef {
    pos: usize,
    id: ZoneId,
}

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, ZoneRef>;

/// Spatial index answering "which zone boxes contain this point"
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
    /// Zones skipped at build time because of malformed geometry
    skipped: usize,
}

impl SpatialIndex {
    /// Empty index
    pub fn new() -> Self {
        Self { tree: RTree::new(), skipped: 0 }
    }

    /// Build an index over `zones`, replacing nothing: the result stands alone.
    ///
    /// Zones with malformed geometry are left out and logged.
    pub fn build(zones: &[Zone]) -> Self {
        let mut entries = Vec::with_capacity(zones.len());
        let mut skipped = 0;

        for (pos, zone) in zones.iter().enumerate() {
            if let Err(reason) = check_geometry(zone) {
                warn!(zone_id = %zone.id, reason = %reason, "spatial_index_zone_skipped");
                skipped += 1;
                continue;
            }

            // Envelope axes are (lon, lat)
            let rect = Rectangle::from_corners(
                [zone.bbox.min_lon, zone.bbox.min_lat],
                [zone.bbox.max_lon, zone.bbox.max_lat],
            );
            entries.push(GeomWithData::new(rect, ZoneRef { pos, id: zone.id.clone() }));
        }

        let tree = RTree::bulk_load(entries);
        debug!(indexed = %tree.size(), skipped = %skipped, "spatial_index_built");

        Self { tree, skipped }
    }

    /// Entries whose box contains `p` (inclusive bounds)
    fn hits<'a>(&'a self, p: &Point) -> impl Iterator<Item = &'a ZoneRef> + 'a {
        self.tree.locate_all_at_point(&[p.lon, p.lat]).map(|entry| &entry.data)
    }

    /// Ids of every zone whose box contains `p`
    pub fn query_point(&self, p: &Point) -> FxHashSet<&ZoneId> {
        self.hits(p).map(|zone| &zone.id).collect()
    }

    /// Catalog positions of every zone whose box contains `p`, ascending
    pub fn query_positions(&self, p: &Point) -> Vec<usize> {
        let mut positions: Vec<usize> = self.hits(p).map(|zone| zone.pos).collect();
        positions.sort_unstable();
        positions
    }

    /// Number of indexed zones
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Zones excluded at build time
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::BoundingBox;
    use rustc_hash::FxHashMap;

    fn square_zone(id: &str, min_lat: f64, min_lon: f64, size: f64) -> Zone {
        let ring = vec![
            Point::new(min_lat, min_lon),
            Point::new(min_lat, min_lon + size),
            Point::new(min_lat + size, min_lon + size),
            Point::new(min_lat + size, min_lon),
        ];
        Zone {
            id: ZoneId::new(id),
            kind: "test".to_string(),
            bbox: BoundingBox::from_points(&ring).unwrap(),
            ring,
            risk_by_mode: FxHashMap::default(),
        }
    }

    #[test]
    fn test_query_hits_containing_boxes() {
        let zones = vec![
            square_zone("a", 0.0, 0.0, 1.0),
            square_zone("b", 0.5, 0.5, 1.0),
            square_zone("c", 10.0, 10.0, 1.0),
        ];
        let index = SpatialIndex::build(&zones);
        assert_eq!(index.len(), 3);

        let hits = index.query_point(&Point::new(0.75, 0.75));
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&ZoneId::new("a")));
        assert!(hits.contains(&ZoneId::new("b")));

        assert!(index.query_point(&Point::new(5.0, 5.0)).is_empty());
        assert_eq!(index.query_positions(&Point::new(0.75, 0.75)), vec![0, 1]);
    }

    #[test]
    fn test_query_bounds_are_inclusive() {
        let zones = vec![square_zone("a", 0.0, 0.0, 1.0)];
        let index = SpatialIndex::build(&zones);

        assert_eq!(index.query_point(&Point::new(0.0, 0.0)).len(), 1);
        assert_eq!(index.query_point(&Point::new(1.0, 1.0)).len(), 1);
        assert_eq!(index.query_point(&Point::new(1.0, 0.5)).len(), 1);
        assert!(index.query_point(&Point::new(1.000001, 0.5)).is_empty());
    }

    #[test]
    fn test_box_hit_without_ring_hit() {
        // Triangle: the corner (0.9, 0.1) is in the box but outside the ring
        let ring = vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        let zones = vec![Zone {
            id: ZoneId::new("tri"),
            kind: "test".to_string(),
            bbox: BoundingBox::from_points(&ring).unwrap(),
            ring,
            risk_by_mode: FxHashMap::default(),
        }];
        let index = SpatialIndex::build(&zones);

        let p = Point::new(0.9, 0.9);
        assert_eq!(index.query_point(&p).len(), 1);
        assert!(!crate::geo::membership::contains(&zones[0].ring, &p));
    }

    #[test]
    fn test_malformed_zones_skipped() {
        let mut inverted = square_zone("inverted", 0.0, 0.0, 1.0);
        inverted.bbox = BoundingBox::new(1.0, 0.0, 0.0, 1.0);
        let mut empty = square_zone("empty", 0.0, 0.0, 1.0);
        empty.ring.clear();

        let zones = vec![inverted, square_zone("ok", 0.0, 0.0, 1.0), empty];
        let index = SpatialIndex::build(&zones);

        assert_eq!(index.len(), 1);
        assert_eq!(index.skipped(), 2);
        assert_eq!(index.query_positions(&Point::new(0.5, 0.5)), vec![1]);
    }

    #[test]
    fn test_rebuild_replaces_content() {
        let first = SpatialIndex::build(&[square_zone("a", 0.0, 0.0, 1.0)]);
        let second = SpatialIndex::build(&[square_zone("b", 5.0, 5.0, 1.0)]);

        assert_eq!(first.query_point(&Point::new(0.5, 0.5)).len(), 1);
        assert!(second.query_point(&Point::new(0.5, 0.5)).is_empty());
        assert!(SpatialIndex::new().is_empty());
    }
}
