//! Cost grid rasterization
//!
//! Settled costs are interpolated along edge geometry and written into a
//! dense row-major grid (min wins). A few 8-neighbour relaxation passes then
//! spread costs into the space between streets at off-network speed.
//!
//! The outermost ring of cells is a sentinel border that is never written,
//! so every contour traced on the grid is closed.

use std::time::Instant;

use geo::Coord;
use tracing::debug;

use super::traversal::Reachability;
use super::Metric;
use crate::config::GridConfig;
use crate::costing::CostModel;
use crate::geo::LocalProjection;
use crate::graph::GraphStore;

/// Sentinel for cells no cost reached
pub const UNREACHED: f32 = f32::INFINITY;

/// Dense cost grid over projected meters
///
/// Cell `(col, row)` covers `[min.x + col*cell, min.x + (col+1)*cell)` and
/// likewise in y; row 0 is the southernmost.
#[derive(Debug, Clone)]
pub struct CostGrid {
    cols: usize,
    rows: usize,
    cell_size: f64,
    min: Coord<f64>,
    values: Vec<f32>,
}

impl CostGrid {
    pub fn new(min: Coord<f64>, cols: usize, rows: usize, cell_size: f64) -> Self {
        Self {
            cols,
            rows,
            cell_size,
            min,
            values: vec![UNREACHED; cols * rows],
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn min(&self) -> Coord<f64> {
        self.min
    }

    #[inline]
    fn index(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f32 {
        self.values[self.index(col, row)]
    }

    pub fn is_reached(&self, col: usize, row: usize) -> bool {
        self.get(col, row).is_finite()
    }

    /// Write `min(existing, value)`; returns whether the cell changed
    pub fn lower(&mut self, col: usize, row: usize, value: f32) -> bool {
        let idx = self.index(col, row);
        if value < self.values[idx] {
            self.values[idx] = value;
            true
        } else {
            false
        }
    }

    /// Cell containing `p`, excluding the sentinel border
    pub fn interior_cell_of(&self, p: Coord<f64>) -> Option<(usize, usize)> {
        let fx = ((p.x - self.min.x) / self.cell_size).floor();
        let fy = ((p.y - self.min.y) / self.cell_size).floor();
        if !(fx >= 1.0 && fy >= 1.0) {
            return None;
        }
        let (col, row) = (fx as usize, fy as usize);
        (col + 1 < self.cols && row + 1 < self.rows).then_some((col, row))
    }

    pub fn center(&self, col: usize, row: usize) -> Coord<f64> {
        Coord {
            x: self.min.x + (col as f64 + 0.5) * self.cell_size,
            y: self.min.y + (row as f64 + 0.5) * self.cell_size,
        }
    }

    pub fn reached_cells(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Relax every interior cell against its 8 neighbours, `passes` times
    ///
    /// Each pass reads the previous pass's values, so costs move at most one
    /// cell per pass. Values above `cap` are not written.
    pub fn spread(&mut self, passes: usize, step: f64, cap: f64) {
        let diagonal = step * std::f64::consts::SQRT_2;
        for _ in 0..passes {
            let prev = self.values.clone();
            let mut changed = 0usize;
            for row in 1..self.rows.saturating_sub(1) {
                for col in 1..self.cols.saturating_sub(1) {
                    let mut best = prev[self.index(col, row)] as f64;
                    for dr in -1i64..=1 {
                        for dc in -1i64..=1 {
                            if dr == 0 && dc == 0 {
                                continue;
                            }
                            let n = prev[self.index(
                                (col as i64 + dc) as usize,
                                (row as i64 + dr) as usize,
                            )];
                            if !n.is_finite() {
                                continue;
                            }
                            let cost = if dr != 0 && dc != 0 { diagonal } else { step };
                            best = best.min(n as f64 + cost);
                        }
                    }
                    if best <= cap && self.lower(col, row, best as f32) {
                        changed += 1;
                    }
                }
            }
            if changed == 0 {
                break;
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct GridStats {
    pub cols: usize,
    pub rows: usize,
    pub cell_size_m: f64,
    pub stamped_edges: usize,
    pub frontier_edges: usize,
    pub samples: usize,
    pub reached_cells: usize,
    pub elapsed_ms: u64,
}

/// Cost of crossing one cell off the network, in metric units
pub fn spread_step(metric: Metric, cell_size: f64, costing: &dyn CostModel) -> f64 {
    match metric {
        Metric::Time => cell_size / costing.off_network_speed_mps(),
        Metric::Distance => cell_size,
    }
}

/// Size a grid around the projected origins, covering everything the bound can reach
pub fn grid_for(
    origins: &[Coord<f64>],
    reach: &Reachability,
    costing: &dyn CostModel,
    config: &GridConfig,
) -> CostGrid {
    let margin = match reach.metric {
        Metric::Time => reach.bound * costing.max_speed_mps(),
        Metric::Distance => reach.bound,
    };

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in origins {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if origins.is_empty() {
        (min_x, min_y, max_x, max_y) = (0.0, 0.0, 0.0, 0.0);
    }

    let width = (max_x - min_x) + 2.0 * margin;
    let height = (max_y - min_y) + 2.0 * margin;
    let cell = config
        .cell_size_m
        .max(width.max(height) / config.max_cells_per_axis as f64);

    // +2 for the sentinel border
    let cols = (width / cell).ceil().max(1.0) as usize + 2;
    let rows = (height / cell).ceil().max(1.0) as usize + 2;
    let min = Coord {
        x: min_x - margin - cell,
        y: min_y - margin - cell,
    };
    CostGrid::new(min, cols, rows, cell)
}

/// Visit points every `step` meters along a polyline, with their fraction of total length
fn sample_polyline(
    points: &[Coord<f64>],
    step: f64,
    mut visit: impl FnMut(Coord<f64>, f64),
) -> usize {
    let seg_len: Vec<f64> = points
        .windows(2)
        .map(|w| ((w[1].x - w[0].x).powi(2) + (w[1].y - w[0].y).powi(2)).sqrt())
        .collect();
    let total: f64 = seg_len.iter().sum();

    if total <= 0.0 || points.len() < 2 {
        if let Some(p) = points.first() {
            visit(*p, 0.0);
            return 1;
        }
        return 0;
    }

    let n = (total / step).ceil().max(1.0) as usize;
    let mut seg = 0usize;
    let mut seg_start = 0.0;
    for k in 0..=n {
        let d = total * k as f64 / n as f64;
        while seg + 1 < seg_len.len() && d > seg_start + seg_len[seg] {
            seg_start += seg_len[seg];
            seg += 1;
        }
        let local = if seg_len[seg] > 0.0 {
            ((d - seg_start) / seg_len[seg]).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (a, b) = (points[seg], points[seg + 1]);
        let p = Coord {
            x: a.x + (b.x - a.x) * local,
            y: a.y + (b.y - a.y) * local,
        };
        visit(p, d / total);
    }
    n + 1
}

/// Interpolate settled costs along every usable edge into `grid`, then spread
pub fn rasterize(
    grid: &mut CostGrid,
    reach: &Reachability,
    store: &dyn GraphStore,
    costing: &dyn CostModel,
    projection: &LocalProjection,
    config: &GridConfig,
) -> GridStats {
    let start = Instant::now();
    let mut stats = GridStats {
        cols: grid.cols(),
        rows: grid.rows(),
        cell_size_m: grid.cell_size(),
        ..Default::default()
    };
    let bound = reach.bound;
    let half_cell = grid.cell_size() * 0.5;
    let mut points: Vec<Coord<f64>> = Vec::new();

    for (node, settled) in reach.iter() {
        let Ok(edges) = store.edges_from(node) else {
            continue;
        };
        let Ok(from) = store.position_of(node) else {
            continue;
        };
        let from = projection.project(from);
        let at = reach.departure.after_secs(settled.secs);

        for edge in edges.iter() {
            // Rescore: the street only carries cost if this mode can use it
            let edge_cost = match costing.score(&edge.attrs, at) {
                Ok(Some(secs)) if secs.is_finite() && secs >= 0.0 => match reach.metric {
                    Metric::Time => secs + costing.turn_cost(settled.heading, edge.depart_heading),
                    Metric::Distance => edge.attrs.length_m,
                },
                _ => continue,
            };
            let Ok(to) = store.position_of(edge.target) else {
                continue;
            };

            points.clear();
            points.push(from);
            points.extend(
                edge.shape
                    .iter()
                    .map(|p| projection.project(Coord { x: p[0], y: p[1] })),
            );
            points.push(projection.project(to));

            let cu = settled.cost;
            let target_cost = reach.cost_of(edge.target);
            if target_cost.is_some() {
                stats.stamped_edges += 1;
            } else {
                stats.frontier_edges += 1;
            }

            stats.samples += sample_polyline(&points, half_cell, |p, fraction| {
                let value = match target_cost {
                    Some(cv) => cu + (cv - cu) * fraction,
                    None => cu + edge_cost * fraction,
                };
                if value > bound {
                    return;
                }
                if let Some((col, row)) = grid.interior_cell_of(p) {
                    grid.lower(col, row, value as f32);
                }
            });
        }
    }

    let step = spread_step(reach.metric, grid.cell_size(), costing);
    grid.spread(config.spread_passes, step, bound);

    stats.reached_cells = grid.reached_cells();
    stats.elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(
        cols = stats.cols,
        rows = stats.rows,
        cell = stats.cell_size_m,
        reached = stats.reached_cells,
        "cost grid rasterized"
    );
    stats
}
