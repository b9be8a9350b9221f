//! Nearby-zone filter for the detection working set
//!
//! Keeps zones whose approximate centroid lies within a great-circle radius of the
//! current location. The centroid is the mean of the ring vertices, not the area
//! centroid; the filter is advisory and zones are assumed near-convex.

use crate::domain::types::{Point, Zone};
use crate::geo::membership::open_ring;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default working-set radius
pub const DEFAULT_RADIUS_KM: f64 = 1.0;

/// Great-circle distance between two points in kilometers
pub fn haversine_km(a: &Point, b: &Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat_half = (dlat / 2.0).sin();
    let sin_dlon_half = (dlon / 2.0).sin();
    let h = sin_dlat_half * sin_dlat_half + lat1.cos() * lat2.cos() * sin_dlon_half * sin_dlon_half;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Arithmetic mean of the ring's distinct vertices
///
/// A closing duplicate vertex is ignored so open and closed rings agree.
pub fn ring_centroid(ring: &[Point]) -> Option<Point> {
    let vertices = open_ring(ring);
    if vertices.is_empty() {
        return None;
    }
    let n = vertices.len() as f64;
    let (lat_sum, lon_sum) =
        vertices.iter().fold((0.0, 0.0), |(lat, lon), p| (lat + p.lat, lon + p.lon));
    Some(Point::new(lat_sum / n, lon_sum / n))
}

/// True if the zone's centroid is within `radius_km` of `location`
pub fn is_nearby(location: &Point, zone: &Zone, radius_km: f64) -> bool {
    match ring_centroid(&zone.ring) {
        Some(centroid) => haversine_km(location, &centroid) <= radius_km,
        None => false,
    }
}

/// Zones within `radius_km` of `location`, in input order
pub fn filter<'a>(location: &Point, zones: &'a [Zone], radius_km: f64) -> Vec<&'a Zone> {
    filter_positions(location, zones, radius_km).into_iter().map(|pos| &zones[pos]).collect()
}

/// Positions in `zones` of the nearby working set, ascending
pub fn filter_positions(location: &Point, zones: &[Zone], radius_km: f64) -> Vec<usize> {
    zones
        .iter()
        .enumerate()
        .filter(|(_, zone)| is_nearby(location, zone, radius_km))
        .map(|(pos, _)| pos)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BoundingBox, ZoneId};
    use rustc_hash::FxHashMap;

    /// Degrees of latitude spanning `km` along a meridian
    fn lat_deg_for_km(km: f64) -> f64 {
        (km / EARTH_RADIUS_KM).to_degrees()
    }

    /// Small square zone centered on `center`
    fn zone_at(id: &str, center: Point) -> Zone {
        let d = 0.0001;
        let ring = vec![
            Point::new(center.lat - d, center.lon - d),
            Point::new(center.lat - d, center.lon + d),
            Point::new(center.lat + d, center.lon + d),
            Point::new(center.lat + d, center.lon - d),
        ];
        let bbox = BoundingBox::from_points(&ring).unwrap();
        Zone {
            id: ZoneId::new(id),
            kind: "test".to_string(),
            ring,
            bbox,
            risk_by_mode: FxHashMap::default(),
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.19 km on a 6371 km sphere
        let d = haversine_km(&Point::new(0.0, 0.0), &Point::new(1.0, 0.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
        assert_eq!(haversine_km(&Point::new(45.0, 7.0), &Point::new(45.0, 7.0)), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = Point::new(33.69, -7.38);
        let b = Point::new(33.70, -7.36);
        assert!((haversine_km(&a, &b) - haversine_km(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_ignores_closing_vertex() {
        let open = vec![Point::new(0.0, 0.0), Point::new(0.0, 2.0), Point::new(2.0, 2.0), Point::new(2.0, 0.0)];
        let mut closed = open.clone();
        closed.push(open[0]);

        assert_eq!(ring_centroid(&open), Some(Point::new(1.0, 1.0)));
        assert_eq!(ring_centroid(&closed), ring_centroid(&open));
        assert_eq!(ring_centroid(&[]), None);
    }

    #[test]
    fn test_radius_boundary() {
        let location = Point::new(33.69, -7.38);
        let inside = zone_at("near", Point::new(location.lat + lat_deg_for_km(0.999), location.lon));
        let outside = zone_at("far", Point::new(location.lat + lat_deg_for_km(1.001), location.lon));

        assert!(is_nearby(&location, &inside, DEFAULT_RADIUS_KM));
        assert!(!is_nearby(&location, &outside, DEFAULT_RADIUS_KM));
    }

    #[test]
    fn test_filter_preserves_order() {
        let location = Point::new(10.0, 10.0);
        let zones = vec![
            zone_at("a", Point::new(10.001, 10.0)),
            zone_at("far", Point::new(11.0, 10.0)),
            zone_at("b", Point::new(10.0, 10.001)),
        ];

        let ids: Vec<&str> =
            filter(&location, &zones, DEFAULT_RADIUS_KM).iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(filter_positions(&location, &zones, DEFAULT_RADIUS_KM), vec![0, 2]);
    }
}
