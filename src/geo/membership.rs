//! Exact point-in-polygon membership
//!
//! Even-odd ray casting over (lon, lat) treated as planar (x, y). Curvature is
//! ignored; zones are small. A point exactly on an edge gets whatever the
//! half-open crossing rule yields, which is stable for identical input.

use crate::domain::types::Point;
use std::borrow::Cow;

/// Rings with |area| at or below this (deg²) are degenerate
const MIN_RING_AREA: f64 = 1e-12;

/// Ring vertices without a trailing closing duplicate
pub fn open_ring(ring: &[Point]) -> &[Point] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Ring with the first vertex repeated at the end, if it was open
pub fn close_ring(ring: &[Point]) -> Cow<'_, [Point]> {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if first != last => {
            let mut closed = Vec::with_capacity(ring.len() + 1);
            closed.extend_from_slice(ring);
            closed.push(*first);
            Cow::Owned(closed)
        }
        _ => Cow::Borrowed(ring),
    }
}

/// Signed shoelace area of a closed ring in deg² (positive = counter-clockwise in lon/lat)
fn signed_area(closed: &[Point]) -> f64 {
    let twice: f64 = closed.windows(2).map(|e| e[0].lon * e[1].lat - e[1].lon * e[0].lat).sum();
    twice / 2.0
}

/// True if the ring encloses a non-negligible area
pub fn is_degenerate(ring: &[Point]) -> bool {
    if open_ring(ring).len() < 3 {
        return true;
    }
    signed_area(&close_ring(ring)).abs() <= MIN_RING_AREA
}

/// Exact containment of `p` in the polygon described by `ring`
pub fn contains(ring: &[Point], p: &Point) -> bool {
    if is_degenerate(ring) {
        return false;
    }

    let closed = close_ring(ring);
    let (x, y) = (p.lon, p.lat);
    let mut inside = false;

    for edge in closed.windows(2) {
        let (xi, yi) = (edge[0].lon, edge[0].lat);
        let (xj, yj) = (edge[1].lon, edge[1].lat);

        // Half-open rule: an edge counts when it straddles the horizontal through p
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
    }

    inside
}
