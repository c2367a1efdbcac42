//! Synthetic street grids for tests, benchmarks and demos
//!
//! A regular lattice of intersections `spacing_m` apart, laid out east and
//! north of a south-west corner. Node ids are `row * cols + col`.

use butterfly_common::{Error, Result};
use geo::Coord;

use crate::geo::{distance_m, LocalProjection};
use crate::graph::{EdgeAttributes, GraphBuilder, MemoryGraph, NodeId, RoadClass, TransitSchedule};

/// Utrecht centraal, matching the reference scenarios
const DEFAULT_SOUTHWEST: Coord<f64> = Coord {
    x: 5.085,
    y: 52.055,
};

#[derive(Debug, Clone)]
struct Block {
    cols: (usize, usize),
    rows: (usize, usize),
}

#[derive(Debug, Clone)]
struct TransitLine {
    row: usize,
    stop_every: usize,
    schedule: TransitSchedule,
}

#[derive(Debug, Clone)]
pub struct SyntheticGrid {
    pub cols: usize,
    pub rows: usize,
    pub spacing_m: f64,
    pub southwest: Coord<f64>,
    pub street: RoadClass,
    /// Every n-th row and column uses this class instead
    pub arterial: Option<(usize, RoadClass)>,
    blocks: Vec<Block>,
    transit: Vec<TransitLine>,
}

impl SyntheticGrid {
    pub fn new(cols: usize, rows: usize, spacing_m: f64) -> Self {
        Self {
            cols,
            rows,
            spacing_m,
            southwest: DEFAULT_SOUTHWEST,
            street: RoadClass::Residential,
            arterial: None,
            blocks: Vec::new(),
            transit: Vec::new(),
        }
    }

    pub fn at(mut self, lon: f64, lat: f64) -> Self {
        self.southwest = Coord { x: lon, y: lat };
        self
    }

    pub fn with_street_class(mut self, class: RoadClass) -> Self {
        self.street = class;
        self
    }

    pub fn with_arterials(mut self, every: usize, class: RoadClass) -> Self {
        self.arterial = Some((every.max(1), class));
        self
    }

    /// Cut every street touching the intersections in the inclusive col/row range
    ///
    /// The nodes stay (isolated) so ids remain `row * cols + col`.
    pub fn without_block(mut self, cols: (usize, usize), rows: (usize, usize)) -> Self {
        self.blocks.push(Block { cols, rows });
        self
    }

    /// Bidirectional transit hops along `row`, one stop every `stop_every` intersections
    pub fn with_transit_line(
        mut self,
        row: usize,
        stop_every: usize,
        schedule: TransitSchedule,
    ) -> Self {
        self.transit.push(TransitLine {
            row,
            stop_every: stop_every.max(1),
            schedule,
        });
        self
    }

    pub fn node(&self, col: usize, row: usize) -> NodeId {
        (row * self.cols + col) as NodeId
    }

    pub fn center_node(&self) -> NodeId {
        self.node(self.cols / 2, self.rows / 2)
    }

    /// lon/lat of intersection (col, row)
    pub fn position(&self, col: usize, row: usize) -> Coord<f64> {
        LocalProjection::new(self.southwest).unproject(Coord {
            x: col as f64 * self.spacing_m,
            y: row as f64 * self.spacing_m,
        })
    }

    fn is_cut(&self, col: usize, row: usize) -> bool {
        self.blocks.iter().any(|b| {
            (b.cols.0..=b.cols.1).contains(&col) && (b.rows.0..=b.rows.1).contains(&row)
        })
    }

    fn class_of(&self, line: usize) -> RoadClass {
        match self.arterial {
            Some((every, class)) if line % every == 0 => class,
            _ => self.street,
        }
    }

    pub fn build(&self) -> Result<MemoryGraph> {
        if self.cols < 2 || self.rows < 2 {
            return Err(Error::InvalidInput(
                "a synthetic grid needs at least 2x2 intersections".to_string(),
            ));
        }
        if !(self.spacing_m.is_finite() && self.spacing_m > 0.0) {
            return Err(Error::InvalidInput(format!("invalid grid spacing {}", self.spacing_m)));
        }

        let mut builder = GraphBuilder::new();
        for row in 0..self.rows {
            for col in 0..self.cols {
                let p = self.position(col, row);
                builder.add_node(p.x, p.y);
            }
        }

        for row in 0..self.rows {
            for col in 0..self.cols {
                if self.is_cut(col, row) {
                    continue;
                }
                let here = self.node(col, row);
                // East along the row, north along the column
                if col + 1 < self.cols && !self.is_cut(col + 1, row) {
                    let east = self.node(col + 1, row);
                    builder.add_road(here, east, self.class_of(row), false, vec![])?;
                }
                if row + 1 < self.rows && !self.is_cut(col, row + 1) {
                    let north = self.node(col, row + 1);
                    builder.add_road(here, north, self.class_of(col), false, vec![])?;
                }
            }
        }

        for line in &self.transit {
            if line.row >= self.rows {
                return Err(Error::InvalidInput(format!(
                    "transit row {} is outside the grid",
                    line.row
                )));
            }
            let stops: Vec<usize> = (0..self.cols).step_by(line.stop_every).collect();
            for pair in stops.windows(2) {
                let (a, b) = (self.node(pair[0], line.row), self.node(pair[1], line.row));
                let length = distance_m(
                    self.position(pair[0], line.row),
                    self.position(pair[1], line.row),
                );
                let attrs = EdgeAttributes::transit(length, line.schedule);
                builder.add_edge(a, b, attrs.clone(), vec![])?;
                builder.add_edge(b, a, attrs, vec![])?;
            }
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;

    #[test]
    fn test_grid_shape_and_spacing() {
        let grid = SyntheticGrid::new(4, 3, 100.0);
        let graph = grid.build().unwrap();
        assert_eq!(graph.node_count(), 12);
        // 3 rows x 3 east edges + 4 cols x 2 north edges, both directions
        assert_eq!(graph.edge_count(), 2 * (9 + 8));

        let a = graph.position_of(grid.node(0, 0)).unwrap();
        let b = graph.position_of(grid.node(1, 0)).unwrap();
        let c = graph.position_of(grid.node(0, 1)).unwrap();
        assert!((distance_m(a, b) - 100.0).abs() < 0.5);
        assert!((distance_m(a, c) - 100.0).abs() < 0.5);
    }

    #[test]
    fn test_block_isolates_nodes() {
        let grid = SyntheticGrid::new(5, 5, 50.0).without_block((1, 2), (1, 1));
        let graph = grid.build().unwrap();
        assert!(graph.edges_from(grid.node(1, 1)).unwrap().is_empty());
        assert!(graph.edges_from(grid.node(2, 1)).unwrap().is_empty());
        assert!(!graph.edges_from(grid.node(3, 1)).unwrap().is_empty());
        assert!(graph
            .edges_from(grid.node(1, 0))
            .unwrap()
            .iter()
            .all(|e| e.target != grid.node(1, 1)));
    }

    #[test]
    fn test_arterials_and_transit() {
        let schedule = TransitSchedule {
            first_departure_s: 6 * 3600,
            last_departure_s: 22 * 3600,
            headway_s: 600,
            ride_s: 120,
        };
        let grid = SyntheticGrid::new(5, 5, 100.0)
            .with_arterials(2, RoadClass::Primary)
            .with_transit_line(2, 2, schedule);
        let graph = grid.build().unwrap();

        let from_origin = graph.edges_from(grid.node(0, 0)).unwrap();
        assert!(from_origin.iter().all(|e| e.attrs.road_class == RoadClass::Primary));

        let transit: Vec<_> = graph
            .edges_from(grid.node(2, 2))
            .unwrap()
            .iter()
            .filter(|e| e.attrs.transit.is_some())
            .map(|e| e.target)
            .collect();
        assert_eq!(transit.len(), 2);
        assert!(transit.contains(&grid.node(0, 2)));
        assert!(transit.contains(&grid.node(4, 2)));
    }

    #[test]
    fn test_degenerate_grid_rejected() {
        assert!(SyntheticGrid::new(1, 5, 100.0).build().is_err());
        assert!(SyntheticGrid::new(5, 5, 0.0).build().is_err());
    }
}
