//! Affected-area boundary polygon extraction.
//!
//! Reduces the occupancy grid to a closed, counter-clockwise geographic
//! ring: boundary cells -> deduplicated local points -> monotone-chain
//! convex hull -> equirectangular conversion about the origin.

use crate::occupancy::OccupancyGrid;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hard cap on emitted ring vertices (closing vertex included).
pub const MAX_RING_VERTICES: usize = 1000;

/// Meters per degree of latitude in the local equirectangular frame.
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Geographic anchor of the source (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// Closed boundary ring in (lon, lat) order, counter-clockwise, with the
/// first vertex repeated at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedPolygon {
    pub ring: Vec<[f64; 2]>,
}

impl AffectedPolygon {
    /// Vertices including the closing repeat.
    pub fn vertex_count(&self) -> usize {
        self.ring.len()
    }

    /// Shoelace area in squared degrees; positive for counter-clockwise
    /// winding.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.ring)
    }
}

fn signed_area(ring: &[[f64; 2]]) -> f64 {
    let mut sum = 0.0;
    for pair in ring.windows(2) {
        sum += pair[0][0] * pair[1][1] - pair[1][0] * pair[0][1];
    }
    sum / 2.0
}

/// Cells on the footprint boundary: occupied with at least one 4-connected
/// neighbor that is unoccupied or out of range.
fn boundary_cells(grid: &OccupancyGrid) -> Vec<(usize, usize)> {
    let dim = grid.dim();
    let mut cells = Vec::new();

    for row in 0..dim {
        for col in 0..dim {
            if !grid.is_occupied(col, row) {
                continue;
            }
            let exposed = (col == 0 || !grid.is_occupied(col - 1, row))
                || (col + 1 == dim || !grid.is_occupied(col + 1, row))
                || (row == 0 || !grid.is_occupied(col, row - 1))
                || (row + 1 == dim || !grid.is_occupied(col, row + 1));
            if exposed {
                cells.push((col, row));
            }
        }
    }
    cells
}

/// Monotone-chain convex hull over integer-meter points. Returns the hull
/// counter-clockwise without a closing repeat.
fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    }

    let mut lower: Vec<(i64, i64)> = Vec::with_capacity(points.len());
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(i64, i64)> = Vec::with_capacity(points.len());
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Uniform stride subsample keeping the ring closed and under the cap.
fn cap_ring(ring: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    if ring.len() <= MAX_RING_VERTICES {
        return ring;
    }
    // Subsample the open ring, then re-close
    let open = ring.len() - 1;
    let stride = open.div_ceil(MAX_RING_VERTICES - 1);
    let mut capped: Vec<[f64; 2]> = ring[..open].iter().copied().step_by(stride).collect();
    capped.push(capped[0]);
    capped
}

/// Extract the affected-area boundary polygon.
///
/// Returns `None` when the grid holds no occupied cells or the hull
/// degenerates below 3 points; callers treat that as "no footprint this
/// tick", not as an error.
pub fn extract(grid: &OccupancyGrid, origin: GeoPoint) -> Option<AffectedPolygon> {
    let mut candidates = boundary_cells(grid);
    if candidates.is_empty() {
        // Degenerate fully-interior case: fall back to every occupied cell
        for row in 0..grid.dim() {
            for col in 0..grid.dim() {
                if grid.is_occupied(col, row) {
                    candidates.push((col, row));
                }
            }
        }
    }
    if candidates.is_empty() {
        return None;
    }

    // Deduplicate cell centers at integer-meter resolution
    let mut seen: FxHashSet<(i64, i64)> = FxHashSet::default();
    let mut points: Vec<(i64, i64)> = Vec::with_capacity(candidates.len());
    for (col, row) in candidates {
        let (x, y) = grid.cell_center(col, row);
        let key = (f64::from(x).round() as i64, f64::from(y).round() as i64);
        if seen.insert(key) {
            points.push(key);
        }
    }

    let hull = convex_hull(points);
    if hull.len() < 3 {
        debug!("footprint hull degenerate ({} points), no polygon", hull.len());
        return None;
    }

    // Equirectangular local approximation around the origin
    let meters_per_deg_lon = METERS_PER_DEG_LAT * origin.lat.to_radians().cos();
    let mut ring: Vec<[f64; 2]> = hull
        .iter()
        .map(|&(x, y)| {
            [
                origin.lon + x as f64 / meters_per_deg_lon,
                origin.lat + y as f64 / METERS_PER_DEG_LAT,
            ]
        })
        .collect();

    // Right-hand orientation: outer ring counter-clockwise
    if signed_area_open(&ring) < 0.0 {
        ring.reverse();
    }
    let first = ring[0];
    ring.push(first);

    Some(AffectedPolygon {
        ring: cap_ring(ring),
    })
}

/// Shoelace area of an unclosed ring.
fn signed_area_open(ring: &[[f64; 2]]) -> f64 {
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        sum += ring[i][0] * ring[j][1] - ring[j][0] * ring[i][1];
    }
    sum / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::compute;
    use crate::meteorology::MeteorologicalState;
    use crate::occupancy::{OccupancyGrid, ThresholdSpec};
    use chrono::{TimeZone, Utc};

    fn origin() -> GeoPoint {
        GeoPoint {
            lon: 13.4,
            lat: 52.5,
        }
    }

    fn occupied_plume_grid() -> OccupancyGrid {
        let time = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let mut state = MeteorologicalState::neutral();
        state.stack_height = 0.0;
        // Frame cell is 1000 m at n = 41; matching the occupancy resolution
        // keeps the rasterized plume contiguous.
        let frame = compute(&state, 41, time);
        let mut grid = OccupancyGrid::new(1000.0, frame.half);
        grid.apply(&frame, ThresholdSpec::Relative(0.01), false);
        grid
    }

    #[test]
    fn test_ring_is_closed_and_ccw() {
        let polygon = extract(&occupied_plume_grid(), origin()).unwrap();

        assert_eq!(polygon.ring[0], polygon.ring[polygon.ring.len() - 1]);
        assert!(
            polygon.signed_area() > 0.0,
            "ring must wind counter-clockwise"
        );
        assert!(polygon.vertex_count() <= MAX_RING_VERTICES);
    }

    #[test]
    fn test_empty_grid_has_no_polygon() {
        let grid = OccupancyGrid::new(500.0, 10_000.0);
        assert!(extract(&grid, origin()).is_none());
    }

    #[test]
    fn test_collinear_cells_have_no_polygon() {
        // Hand-occupy three collinear cells via a synthetic hull check
        let hull = convex_hull(vec![(0, 0), (1000, 0), (2000, 0)]);
        assert!(hull.len() < 3);
    }

    #[test]
    fn test_convex_hull_square_is_ccw() {
        let hull = convex_hull(vec![
            (0, 0),
            (1000, 0),
            (1000, 1000),
            (0, 1000),
            (500, 500),
        ]);

        assert_eq!(hull.len(), 4);
        // Interior point dropped
        assert!(!hull.contains(&(500, 500)));
        // Counter-clockwise: positive doubled area via the shoelace formula
        let mut doubled = 0i64;
        for i in 0..hull.len() {
            let j = (i + 1) % hull.len();
            doubled += hull[i].0 * hull[j].1 - hull[j].0 * hull[i].1;
        }
        assert!(doubled > 0);
    }

    #[test]
    fn test_vertex_cap_subsamples_and_recloses() {
        // Synthetic over-long closed ring around a circle
        let n = 4000;
        let mut ring: Vec<[f64; 2]> = (0..n)
            .map(|i| {
                let angle = std::f64::consts::TAU * i as f64 / n as f64;
                [angle.cos(), angle.sin()]
            })
            .collect();
        ring.push(ring[0]);

        let capped = cap_ring(ring);
        assert!(capped.len() <= MAX_RING_VERTICES);
        assert_eq!(capped[0], capped[capped.len() - 1]);
    }

    #[test]
    fn test_boundary_excludes_interior_cells() {
        let grid = occupied_plume_grid();
        let boundary = boundary_cells(&grid);
        let occupied = grid.occupied_cells();

        assert!(!boundary.is_empty());
        assert!(
            boundary.len() < occupied,
            "a filled plume must have interior cells ({} boundary, {occupied} occupied)",
            boundary.len()
        );
    }
}
