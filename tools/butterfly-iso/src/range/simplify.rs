//! Denoise and generalize contour geometry
//!
//! Both operations are no-ops at their defaults (`denoise = 0`,
//! `generalize = 0`) and idempotent: running them twice gives the same result.

use geo::{BoundingRect, Contains, Coord, Point};

use super::assemble::{PolygonShape, Ring};
use super::raster::CostGrid;

/// Drop closed rings that enclose fewer than two cell centres
///
/// Such a ring traces one sample that sits on the other side of the
/// threshold from all of its neighbours, which the grid cannot resolve.
/// Runs whatever the `denoise` setting.
pub fn drop_unresolved(rings: Vec<Ring>, grid: &CostGrid) -> Vec<Ring> {
    rings
        .into_iter()
        .filter(|r| encloses_cells(r, grid, 2))
        .collect()
}

fn encloses_cells(ring: &Ring, grid: &CostGrid, wanted: usize) -> bool {
    let cell = grid.cell_size();
    // A ring around a single centre stays inside its 2x2 cell neighbourhood
    if ring.area() >= 2.0 * wanted as f64 * cell * cell {
        return true;
    }

    let polygon = ring.to_polygon();
    let Some(rect) = polygon.bounding_rect() else {
        return false;
    };
    let origin = grid.min();
    let span = |lo: f64, hi: f64, start: f64, n: usize| {
        let first = ((lo - start) / cell - 0.5).ceil().max(0.0);
        let last = ((hi - start) / cell - 0.5).floor().min(n as f64 - 1.0);
        if last < first {
            0..0
        } else {
            first as usize..last as usize + 1
        }
    };

    let mut found = 0;
    for row in span(rect.min().y, rect.max().y, origin.y, grid.rows()) {
        for col in span(rect.min().x, rect.max().x, origin.x, grid.cols()) {
            if polygon.contains(&Point::from(grid.center(col, row))) {
                found += 1;
                if found >= wanted {
                    return true;
                }
            }
        }
    }
    false
}

/// Drop closed rings smaller than `denoise` x the largest ring
pub fn denoise_rings(rings: Vec<Ring>, denoise: f64) -> Vec<Ring> {
    if denoise <= 0.0 {
        return rings;
    }
    let largest = rings.iter().map(Ring::area).fold(0.0, f64::max);
    let min_area = denoise * largest;
    rings.into_iter().filter(|r| r.area() >= min_area).collect()
}

/// Drop polygons and holes smaller than `denoise` x the largest ring
///
/// Holes of a dropped polygon go with it.
pub fn denoise_polygons(shapes: Vec<PolygonShape>, denoise: f64) -> Vec<PolygonShape> {
    if denoise <= 0.0 {
        return shapes;
    }
    let largest = shapes
        .iter()
        .flat_map(|s| std::iter::once(&s.exterior).chain(s.interiors.iter()))
        .map(Ring::area)
        .fold(0.0, f64::max);
    let min_area = denoise * largest;

    shapes
        .into_iter()
        .filter(|s| s.exterior.area() >= min_area)
        .map(|mut s| {
            s.interiors.retain(|h| h.area() >= min_area);
            s
        })
        .collect()
}

/// Douglas-Peucker on an open polyline; endpoints are always kept
pub fn douglas_peucker(points: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }

    // Find the point with the maximum distance from the line between first and last
    let (first, last) = (points[0], points[points.len() - 1]);
    let mut max_dist = 0.0;
    let mut max_idx = 0;

    for (i, &point) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perpendicular_distance(point, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        let mut result1 = douglas_peucker(&points[..=max_idx], tolerance);
        let result2 = douglas_peucker(&points[max_idx..], tolerance);

        result1.pop(); // Remove duplicate point
        result1.extend(result2);
        result1
    } else {
        vec![first, last]
    }
}

/// Distance from a point to a segment
fn perpendicular_distance(point: Coord<f64>, line_start: Coord<f64>, line_end: Coord<f64>) -> f64 {
    let dx = line_end.x - line_start.x;
    let dy = line_end.y - line_start.y;

    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return ((point.x - line_start.x).powi(2) + (point.y - line_start.y).powi(2)).sqrt();
    }

    let t = ((point.x - line_start.x) * dx + (point.y - line_start.y) * dy) / len_sq;
    let t = t.clamp(0.0, 1.0);

    let proj_x = line_start.x + t * dx;
    let proj_y = line_start.y + t * dy;

    ((point.x - proj_x).powi(2) + (point.y - proj_y).powi(2)).sqrt()
}

/// Simplify an open line; lines are never shortened below their two endpoints
pub fn generalize_line(points: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    if tolerance <= 0.0 {
        return points.to_vec();
    }
    douglas_peucker(points, tolerance)
}

/// Simplify a closed ring
///
/// The ring is split at the vertex farthest from its first vertex (first
/// such vertex on ties) and each half simplified. A ring that would fall
/// below 4 coordinates is returned unchanged.
pub fn generalize_ring(ring: &Ring, tolerance: f64) -> Ring {
    let coords = &ring.coords;
    if tolerance <= 0.0 || coords.len() < 5 {
        return ring.clone();
    }

    let first = coords[0];
    let mut split = 0;
    let mut max_dist = 0.0;
    for (i, c) in coords.iter().enumerate().take(coords.len() - 1).skip(1) {
        let d = (c.x - first.x).powi(2) + (c.y - first.y).powi(2);
        if d > max_dist {
            max_dist = d;
            split = i;
        }
    }
    if split == 0 {
        return ring.clone();
    }

    let mut simplified = douglas_peucker(&coords[..=split], tolerance);
    simplified.pop();
    simplified.extend(douglas_peucker(&coords[split..], tolerance));

    if simplified.len() < 4 {
        return ring.clone();
    }
    Ring {
        coords: simplified,
    }
}

pub fn generalize_polygon(shape: &PolygonShape, tolerance: f64) -> PolygonShape {
    PolygonShape {
        exterior: generalize_ring(&shape.exterior, tolerance),
        interiors: shape
            .interiors
            .iter()
            .map(|h| generalize_ring(h, tolerance))
            .collect(),
        parent: shape.parent,
    }
}
