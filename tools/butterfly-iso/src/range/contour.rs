//! Marching squares over a cost grid
//!
//! Sample values sit at cell centres; each 2x2 block of centres is one
//! marching-squares cell. A corner is inside when its value is below the
//! threshold; unreached corners count as `ceiling`.
//!
//! Segments are oriented with the inside on their left, so closed chains
//! around reached areas run counter-clockwise and chains around unreached
//! pockets run clockwise.
//!
//! Crossing parameters are clamped to `[MIN_T, MAX_T]`: a crossing never
//! lands exactly on a sample, even when the sample equals the threshold, so
//! no segment has zero length.
//!
//! Block corners and edges, counter-clockwise from bottom-left:
//!
//! ```text
//!   tl(8) --2-- tr(4)
//!    |           |
//!    3           1
//!    |           |
//!   bl(1) --0-- br(2)
//! ```

use geo::Coord;

use super::raster::CostGrid;

/// Crossings never land on either corner, so adjacent crossings stay distinct
const MIN_T: f64 = 1e-4;
const MAX_T: f64 = 1.0 - 1e-4;

/// Directed contour piece from `a` to `b`, inside on the left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Coord<f64>,
    pub b: Coord<f64>,
}

/// Edges a segment joins for each non-saddle case, as (from, to)
///
/// Saddles (5 and 10) are resolved by `saddle_edges`.
const CASE_EDGES: [Option<(u8, u8)>; 16] = [
    None,         // 0: all outside
    Some((0, 3)), // 1: bl
    Some((1, 0)), // 2: br
    Some((1, 3)), // 3: bl br
    Some((2, 1)), // 4: tr
    None,         // 5: saddle bl tr
    Some((2, 0)), // 6: br tr
    Some((2, 3)), // 7: bl br tr
    Some((3, 2)), // 8: tl
    Some((0, 2)), // 9: bl tl
    None,         // 10: saddle br tl
    Some((1, 2)), // 11: bl br tl
    Some((3, 1)), // 12: tr tl
    Some((0, 1)), // 13: bl tr tl
    Some((3, 0)), // 14: br tr tl
    None,         // 15: all inside
];

/// Saddle resolution from the block centre (mean of the corners)
///
/// Centre inside joins the two inside corners, so the segments cut off the
/// outside corners; centre outside keeps the inside corners separate.
fn saddle_edges(case: u8, center_inside: bool) -> [(u8, u8); 2] {
    match (case, center_inside) {
        (5, false) => [(0, 3), (2, 1)],
        (5, true) => [(0, 1), (2, 3)],
        (10, false) => [(1, 0), (3, 2)],
        _ => [(1, 2), (3, 0)],
    }
}

struct Sampler<'a> {
    grid: &'a CostGrid,
    threshold: f64,
    ceiling: f64,
}

impl Sampler<'_> {
    #[inline]
    fn value(&self, col: usize, row: usize) -> f64 {
        let v = self.grid.get(col, row);
        if v.is_finite() {
            v as f64
        } else {
            self.ceiling
        }
    }

    #[inline]
    fn crossing_t(&self, from: f64, to: f64) -> f64 {
        ((self.threshold - from) / (to - from)).clamp(MIN_T, MAX_T)
    }

    /// Crossing on the edge from centre (col, row) to (col + 1, row)
    fn horizontal(&self, col: usize, row: usize) -> Coord<f64> {
        let t = self.crossing_t(self.value(col, row), self.value(col + 1, row));
        let c = self.grid.center(col, row);
        Coord {
            x: c.x + t * self.grid.cell_size(),
            y: c.y,
        }
    }

    /// Crossing on the edge from centre (col, row) to (col, row + 1)
    fn vertical(&self, col: usize, row: usize) -> Coord<f64> {
        let t = self.crossing_t(self.value(col, row), self.value(col, row + 1));
        let c = self.grid.center(col, row);
        Coord {
            x: c.x,
            y: c.y + t * self.grid.cell_size(),
        }
    }

    /// Crossing on block edge `edge` of the block whose bottom-left centre is (col, row)
    ///
    /// Always computed from the lower-index centre so that the two blocks
    /// sharing an edge produce bit-identical points.
    fn edge_point(&self, col: usize, row: usize, edge: u8) -> Coord<f64> {
        match edge {
            0 => self.horizontal(col, row),
            1 => self.vertical(col + 1, row),
            2 => self.horizontal(col, row + 1),
            _ => self.vertical(col, row),
        }
    }
}

/// Oriented contour segments for `threshold`, in row-major block order
///
/// `ceiling` stands in for unreached cells and must exceed every threshold.
pub fn extract(grid: &CostGrid, threshold: f64, ceiling: f64) -> Vec<Segment> {
    let mut segments = Vec::new();
    if grid.cols() < 2 || grid.rows() < 2 {
        return segments;
    }

    let sampler = Sampler {
        grid,
        threshold,
        ceiling,
    };

    for row in 0..grid.rows() - 1 {
        for col in 0..grid.cols() - 1 {
            let bl = sampler.value(col, row);
            let br = sampler.value(col + 1, row);
            let tr = sampler.value(col + 1, row + 1);
            let tl = sampler.value(col, row + 1);

            let case = (bl < threshold) as u8
                | ((br < threshold) as u8) << 1
                | ((tr < threshold) as u8) << 2
                | ((tl < threshold) as u8) << 3;

            let mut emit = |from: u8, to: u8| {
                segments.push(Segment {
                    a: sampler.edge_point(col, row, from),
                    b: sampler.edge_point(col, row, to),
                });
            };

            match case {
                0 | 15 => {}
                5 | 10 => {
                    let center = (bl + br + tr + tl) * 0.25;
                    for (from, to) in saddle_edges(case, center < threshold) {
                        emit(from, to);
                    }
                }
                _ => {
                    if let Some((from, to)) = CASE_EDGES[case as usize] {
                        emit(from, to);
                    }
                }
            }
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_from(rows: &[&[f32]]) -> CostGrid {
        // rows given top to bottom for readability
        let n_rows = rows.len();
        let n_cols = rows[0].len();
        let mut grid = CostGrid::new(Coord { x: 0.0, y: 0.0 }, n_cols, n_rows, 1.0);
        for (i, values) in rows.iter().enumerate() {
            let row = n_rows - 1 - i;
            for (col, v) in values.iter().enumerate() {
                grid.lower(col, row, *v);
            }
        }
        grid
    }

    const X: f32 = f32::INFINITY;

    fn signed_area(ring: &[Coord<f64>]) -> f64 {
        ring.windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum::<f64>()
            * 0.5
    }

    /// Follow segments end-to-start from the first one until back at the start
    fn walk(segments: &[Segment]) -> Vec<Coord<f64>> {
        let mut ring = vec![segments[0].a, segments[0].b];
        while ring.last() != ring.first() {
            let end = *ring.last().unwrap();
            let next = segments.iter().find(|s| s.a == end).unwrap();
            ring.push(next.b);
        }
        ring
    }

    #[test]
    fn test_single_reached_cell_is_ccw_diamond() {
        let grid = grid_from(&[&[X, X, X], &[X, 0.0, X], &[X, X, X]]);
        let segments = extract(&grid, 10.0, 20.0);
        assert_eq!(segments.len(), 4);

        let ring = walk(&segments);
        assert_eq!(ring.len(), 5);
        assert!(signed_area(&ring) > 0.0);

        // Crossing halfway between 0 and the ceiling of 20
        assert!(ring.iter().any(|p| (p.x - 2.0).abs() < 1e-12 && (p.y - 1.5).abs() < 1e-12));
    }

    #[test]
    fn test_unreached_pocket_is_cw() {
        let grid = grid_from(&[
            &[X, X, X, X, X],
            &[X, 0.0, 0.0, 0.0, X],
            &[X, 0.0, X, 0.0, X],
            &[X, 0.0, 0.0, 0.0, X],
            &[X, X, X, X, X],
        ]);
        let segments = extract(&grid, 10.0, 20.0);

        // Split into two loops: the outer boundary and the pocket around the centre
        let mut remaining = segments.clone();
        let mut areas = Vec::new();
        while !remaining.is_empty() {
            let ring = walk(&remaining);
            remaining.retain(|s| !ring.contains(&s.a));
            areas.push(signed_area(&ring));
        }
        assert_eq!(areas.len(), 2);
        assert!(areas.iter().any(|a| *a > 0.0));
        assert!(areas.iter().any(|a| *a < 0.0));
    }

    #[test]
    fn test_saddle_centre_outside_keeps_corners_apart() {
        // bl and tr inside, centre mean (0 + 20 + 0 + 20) / 4 = 10 is not below 10
        let grid = grid_from(&[&[20.0, 0.0], &[0.0, 20.0]]);
        let segments = extract(&grid, 10.0, 30.0);
        assert_eq!(segments.len(), 2);
        // bottom -> left cuts off bl
        assert_eq!(segments[0].a, Coord { x: 1.0, y: 0.5 });
        assert_eq!(segments[0].b, Coord { x: 0.5, y: 1.0 });
    }

    #[test]
    fn test_saddle_centre_inside_joins_corners() {
        // bl and tr inside, centre mean 7 < 10
        let grid = grid_from(&[&[12.0, 2.0], &[2.0, 12.0]]);
        let segments = extract(&grid, 10.0, 30.0);
        assert_eq!(segments.len(), 2);
        // bottom -> right cuts off br
        assert_eq!(segments[0].a.y, 0.5);
        assert_eq!(segments[0].b.x, 1.5);
    }

    #[test]
    fn test_shared_crossings_identical() {
        let grid = grid_from(&[
            &[X, X, X, X],
            &[X, 1.0, 3.0, X],
            &[X, 2.0, 7.0, X],
            &[X, X, X, X],
        ]);
        let segments = extract(&grid, 5.0, 12.0);
        for s in &segments {
            assert_eq!(segments.iter().filter(|o| o.a == s.b).count(), 1);
        }
    }

    #[test]
    fn test_crossing_clamped_away_from_corners() {
        let grid = grid_from(&[&[X, X, X], &[X, 0.0, X], &[X, X, X]]);
        // A threshold barely above the reached value puts crossings on the reached centre
        let segments = extract(&grid, 1e-9, 20.0);
        assert_eq!(segments.len(), 4);
        for s in &segments {
            for p in [s.a, s.b] {
                let gap = (p.x - 1.5).abs() + (p.y - 1.5).abs();
                assert!(gap >= 1e-4 - 1e-12, "crossing {p:?} on the centre");
            }
        }
    }

    #[test]
    fn test_value_on_threshold_gives_no_degenerate_segment() {
        let grid = grid_from(&[
            &[X, X, X, X, X],
            &[X, 0.0, 0.0, 0.0, X],
            &[X, 0.0, 10.0, 0.0, X],
            &[X, 0.0, 0.0, 0.0, X],
            &[X, X, X, X, X],
        ]);
        let segments = extract(&grid, 10.0, 20.0);
        assert!(segments.iter().all(|s| s.a != s.b));

        let centre = Coord { x: 2.5, y: 2.5 };
        let pocket: Vec<Segment> = segments
            .iter()
            .copied()
            .filter(|s| (s.a.x - centre.x).abs() < 0.5 && (s.a.y - centre.y).abs() < 0.5)
            .collect();
        assert_eq!(pocket.len(), 4);

        let ring = walk(&pocket);
        assert_eq!(ring.len(), 5);
        assert!(signed_area(&ring) < 0.0);
        for p in &ring {
            assert!((p.x - centre.x).abs() + (p.y - centre.y).abs() >= 1e-4 - 1e-12);
        }
    }
}
