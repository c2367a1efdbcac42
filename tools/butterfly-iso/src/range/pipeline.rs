//! One isochrone query, end to end
//!
//! Validates the query, expands from the origins, rasterizes, contours each
//! threshold and assembles the geometry. Output coordinates are lon/lat.

use std::time::{Duration, Instant};

use butterfly_common::{Error, Result};
use geo::{Coord, Rect};
use tracing::{debug, info, info_span};

use super::assemble::{self, PolygonShape, Ring};
use super::raster::{self, GridStats};
use super::traversal::{self, TraversalParams, TraversalStats};
use super::{contour, simplify, ContourSpec, Metric, Origin, OutputKind};
use crate::config::{EngineConfig, PolygonNesting};
use crate::costing::{CostModel, TimeOfDay};
use crate::geo::{centroid, LocalProjection};
use crate::graph::GraphStore;

/// Everything the engine needs for one isochrone, in internal units
#[derive(Debug, Clone)]
pub struct IsochroneQuery {
    pub origins: Vec<Origin>,
    /// Ascending by threshold, one metric
    pub contours: Vec<ContourSpec>,
    pub departure: TimeOfDay,
    /// Drop rings below this fraction of the largest ring, in [0, 1)
    pub denoise: f64,
    /// Douglas-Peucker tolerance in meters
    pub generalize_m: f64,
}

impl IsochroneQuery {
    pub fn new(origins: Vec<Origin>, contours: Vec<ContourSpec>) -> Self {
        Self {
            origins,
            contours,
            departure: TimeOfDay::default(),
            denoise: 0.0,
            generalize_m: 0.0,
        }
    }

    /// Check the query and return its metric
    pub fn validate(&self) -> Result<Metric> {
        if self.origins.is_empty() {
            return Err(Error::InvalidInput("at least one location is required".to_string()));
        }
        for origin in &self.origins {
            let offsets_ok = [origin.offset_secs, origin.offset_m]
                .iter()
                .all(|v| v.is_finite() && *v >= 0.0);
            if !offsets_ok {
                return Err(Error::InvalidInput(format!(
                    "origin {} has an invalid cost offset",
                    origin.node
                )));
            }
        }

        let Some(first) = self.contours.first() else {
            return Err(Error::InvalidInput("at least one contour is required".to_string()));
        };
        let metric = first.metric;
        let mut previous = 0.0;
        for spec in &self.contours {
            if spec.metric != metric {
                return Err(Error::InvalidInput(
                    "contours must all be time or all be distance".to_string(),
                ));
            }
            if !(spec.threshold.is_finite() && spec.threshold > 0.0) {
                return Err(Error::InvalidInput(format!(
                    "contour threshold {} must be a positive number",
                    spec.threshold
                )));
            }
            if spec.threshold <= previous {
                return Err(Error::InvalidInput(
                    "contour thresholds must be distinct and ascending".to_string(),
                ));
            }
            previous = spec.threshold;
        }

        if !(0.0..1.0).contains(&self.denoise) {
            return Err(Error::InvalidInput(format!(
                "denoise {} must be in [0, 1)",
                self.denoise
            )));
        }
        if !(self.generalize_m.is_finite() && self.generalize_m >= 0.0) {
            return Err(Error::InvalidInput(format!(
                "generalize {} must be >= 0",
                self.generalize_m
            )));
        }
        Ok(metric)
    }
}

/// Contour geometry in lon/lat
#[derive(Debug, Clone, PartialEq)]
pub enum ContourGeometry {
    /// Isolines: closed rings (first == last) and chains cut by the grid border
    Lines(Vec<Vec<Coord<f64>>>),
    Polygons(Vec<PolygonShape>),
}

impl ContourGeometry {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Lines(lines) => lines.is_empty(),
            Self::Polygons(polygons) => polygons.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContourResult {
    pub spec: ContourSpec,
    pub geometry: ContourGeometry,
}

#[derive(Debug, Default, Clone)]
pub struct IsochroneStats {
    pub traversal: TraversalStats,
    pub grid: GridStats,
    pub settled: usize,
    pub segments: usize,
    pub rings: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IsochroneResult {
    /// Same order as the query's contours (ascending threshold)
    pub contours: Vec<ContourResult>,
    /// The deadline cut the expansion short; contours cover what was settled
    pub truncated: bool,
    pub stats: IsochroneStats,
}

/// Geometry between assembly and output, still in projected meters
enum Staged {
    Lines { closed: Vec<Ring>, open: Vec<Vec<Coord<f64>>> },
    Polygons(Vec<PolygonShape>),
}

/// Runs isochrone queries against a shared read-only graph
pub struct IsochroneEngine<'g> {
    store: &'g dyn GraphStore,
    config: EngineConfig,
}

impl<'g> IsochroneEngine<'g> {
    pub fn new(store: &'g dyn GraphStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &'g dyn GraphStore {
        self.store
    }

    /// Run with the configured request timeout, if any
    pub fn run(&self, costing: &dyn CostModel, query: &IsochroneQuery) -> Result<IsochroneResult> {
        let deadline = self
            .config
            .request_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        self.run_until(costing, query, deadline)
    }

    pub fn run_until(
        &self,
        costing: &dyn CostModel,
        query: &IsochroneQuery,
        deadline: Option<Instant>,
    ) -> Result<IsochroneResult> {
        let start = Instant::now();
        let span = info_span!(
            "isochrone",
            mode = %costing.mode(),
            contours = query.contours.len(),
            origins = query.origins.len()
        );
        let _enter = span.enter();

        let metric = query.validate()?;
        let grid_config = self.config.grid(costing.mode());
        let max_threshold = query
            .contours
            .iter()
            .map(|c| c.threshold)
            .fold(0.0, f64::max);
        let bound = max_threshold * (1.0 + self.config.bound_margin);

        let reach = traversal::expand(
            self.store,
            costing,
            &query.origins,
            &TraversalParams {
                metric,
                bound,
                departure: query.departure,
                deadline,
            },
        )?;
        if reach.truncated {
            info!(settled = reach.len(), "deadline reached, returning partial isochrone");
        }

        let positions: Vec<Coord<f64>> = query
            .origins
            .iter()
            .filter_map(|o| self.store.position_of(o.node).ok())
            .collect();
        let center = centroid(&positions).ok_or(Error::LocationUnreachable)?;
        let projection = LocalProjection::new(center);
        let projected: Vec<Coord<f64>> = positions.iter().map(|p| projection.project(*p)).collect();

        let mut grid = raster::grid_for(&projected, &reach, costing, grid_config);
        let grid_stats =
            raster::rasterize(&mut grid, &reach, self.store, costing, &projection, grid_config);

        // Unreached cells read as one off-network step past the bound
        let ceiling = bound + raster::spread_step(metric, grid.cell_size(), costing);
        let epsilon = grid.cell_size() * 1e-6;
        let border = Rect::new(
            grid.center(0, 0),
            grid.center(grid.cols() - 1, grid.rows() - 1),
        );

        let mut stats = IsochroneStats {
            settled: reach.len(),
            grid: grid_stats,
            ..Default::default()
        };

        let mut staged: Vec<Staged> = Vec::with_capacity(query.contours.len());
        for spec in &query.contours {
            let segments = contour::extract(&grid, spec.threshold, ceiling);
            stats.segments += segments.len();
            let mut chains = assemble::chain_segments(&segments, epsilon);
            chains.closed = simplify::drop_unresolved(chains.closed, &grid);

            let stage = match spec.kind {
                OutputKind::Isoline => Staged::Lines {
                    closed: simplify::denoise_rings(chains.closed, query.denoise),
                    open: chains.open,
                },
                OutputKind::Polygon => {
                    let rings = assemble::close_chains(chains, &border, self.config.open_rings);
                    let shapes = assemble::build_polygons(rings);
                    Staged::Polygons(simplify::denoise_polygons(shapes, query.denoise))
                }
            };
            debug!(threshold = spec.threshold, segments = segments.len(), "contour assembled");
            staged.push(stage);
        }

        self.nest_polygons(&mut staged);

        let contours: Vec<ContourResult> = query
            .contours
            .iter()
            .zip(staged)
            .map(|(spec, stage)| {
                let geometry = match stage {
                    Staged::Lines { closed, open } => {
                        stats.rings += closed.len();
                        let mut lines: Vec<Vec<Coord<f64>>> = closed
                            .iter()
                            .map(|r| simplify::generalize_ring(r, query.generalize_m).coords)
                            .collect();
                        lines.extend(
                            open.iter()
                                .map(|l| simplify::generalize_line(l, query.generalize_m)),
                        );
                        ContourGeometry::Lines(
                            lines
                                .into_iter()
                                .map(|l| l.into_iter().map(|c| projection.unproject(c)).collect())
                                .collect(),
                        )
                    }
                    Staged::Polygons(shapes) => {
                        stats.rings += shapes.iter().map(|s| 1 + s.interiors.len()).sum::<usize>();
                        ContourGeometry::Polygons(
                            shapes
                                .iter()
                                .map(|s| {
                                    let s = simplify::generalize_polygon(s, query.generalize_m);
                                    PolygonShape {
                                        exterior: s
                                            .exterior
                                            .map_coords(|c| projection.unproject(c)),
                                        interiors: s
                                            .interiors
                                            .iter()
                                            .map(|h| h.map_coords(|c| projection.unproject(c)))
                                            .collect(),
                                        parent: s.parent,
                                    }
                                })
                                .collect(),
                        )
                    }
                };
                ContourResult {
                    spec: spec.clone(),
                    geometry,
                }
            })
            .collect();

        stats.traversal = reach.stats.clone();
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            settled = stats.settled,
            cells = stats.grid.reached_cells,
            segments = stats.segments,
            rings = stats.rings,
            elapsed_ms = stats.elapsed_ms,
            "isochrone computed"
        );

        Ok(IsochroneResult {
            contours,
            truncated: reach.truncated,
            stats,
        })
    }

    /// Link consecutive polygon contours and apply the configured nesting
    fn nest_polygons(&self, staged: &mut [Staged]) {
        let slots: Vec<usize> = staged
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Staged::Polygons(_)))
            .map(|(i, _)| i)
            .collect();
        if slots.len() < 2 {
            return;
        }

        let mut levels: Vec<Vec<PolygonShape>> = slots
            .iter()
            .map(|&i| match &mut staged[i] {
                Staged::Polygons(shapes) => std::mem::take(shapes),
                Staged::Lines { .. } => Vec::new(),
            })
            .collect();

        assemble::link_levels(&mut levels);
        if self.config.nesting == PolygonNesting::Banded {
            levels = assemble::into_bands(levels);
        }

        for (&i, level) in slots.iter().zip(levels) {
            staged[i] = Staged::Polygons(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::costing::PedestrianCost;
    use crate::graph::{GraphBuilder, MemoryGraph, NodeId, RoadClass};

    fn query(node: NodeId, minutes: &[f64], kind: OutputKind) -> IsochroneQuery {
        IsochroneQuery::new(
            vec![Origin::at_node(node)],
            minutes.iter().map(|m| ContourSpec::time_minutes(*m, kind)).collect(),
        )
    }

    /// A plus-shaped crossing of two streets
    fn crossing() -> MemoryGraph {
        let mut b = GraphBuilder::new();
        let center = b.add_node(4.35, 50.85);
        let arms = [(0.005, 0.0), (-0.005, 0.0), (0.0, 0.003), (0.0, -0.003)];
        for (dx, dy) in arms {
            let end = b.add_node(4.35 + dx, 50.85 + dy);
            b.add_road(center, end, RoadClass::Residential, false, vec![]).unwrap();
        }
        b.build()
    }

    #[test]
    fn test_validation() {
        let graph = crossing();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let cost = PedestrianCost::new();

        let mut q = query(0, &[5.0], OutputKind::Polygon);
        q.origins.clear();
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let q = query(0, &[10.0, 5.0], OutputKind::Polygon);
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let q = query(0, &[5.0, 5.0], OutputKind::Polygon);
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let q = query(0, &[0.0], OutputKind::Polygon);
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let mut q = query(0, &[5.0], OutputKind::Polygon);
        q.contours.push(ContourSpec::distance_km(1.0, OutputKind::Polygon));
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let mut q = query(0, &[5.0], OutputKind::Polygon);
        q.denoise = 1.0;
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));

        let mut q = query(0, &[5.0], OutputKind::Polygon);
        q.generalize_m = -1.0;
        assert!(matches!(engine.run(&cost, &q), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_origin_is_unreachable() {
        let graph = crossing();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let err = engine
            .run(&PedestrianCost::new(), &query(42, &[5.0], OutputKind::Polygon))
            .unwrap_err();
        assert!(matches!(err, Error::LocationUnreachable));
    }

    #[test]
    fn test_crossing_gives_one_polygon_around_origin() {
        let graph = crossing();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let result = engine
            .run(&PedestrianCost::new(), &query(0, &[3.0], OutputKind::Polygon))
            .unwrap();

        assert!(!result.truncated);
        let ContourGeometry::Polygons(shapes) = &result.contours[0].geometry else {
            panic!("expected polygons");
        };
        assert_eq!(shapes.len(), 1);
        let shape = &shapes[0];
        assert!(shape.exterior.is_ccw());
        assert_eq!(shape.exterior.coords.first(), shape.exterior.coords.last());

        use geo::Contains;
        let origin = geo::Point::new(4.35, 50.85);
        assert!(shape.exterior.to_polygon().contains(&origin));
    }

    #[test]
    fn test_contours_keep_query_order_and_style() {
        let graph = crossing();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let mut q = query(0, &[2.0, 4.0], OutputKind::Isoline);
        q.contours[1].style.color = Some("ff0000".to_string());
        let result = engine.run(&PedestrianCost::new(), &q).unwrap();

        assert_eq!(result.contours.len(), 2);
        assert_eq!(result.contours[0].spec.threshold, 120.0);
        assert_eq!(result.contours[1].spec.style.color.as_deref(), Some("ff0000"));
        for c in &result.contours {
            let ContourGeometry::Lines(lines) = &c.geometry else {
                panic!("expected lines");
            };
            assert!(!lines.is_empty());
        }
    }

    #[test]
    fn test_isolated_origin_is_empty() {
        let mut b = GraphBuilder::new();
        b.add_node(4.35, 50.85);
        let graph = b.build();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let result = engine
            .run(&PedestrianCost::new(), &query(0, &[5.0, 10.0], OutputKind::Polygon))
            .unwrap();
        assert!(result.contours.iter().all(|c| c.geometry.is_empty()));
    }

    #[test]
    fn test_expired_deadline_is_partial_not_error() {
        let graph = crossing();
        let engine = IsochroneEngine::new(&graph, EngineConfig::default());
        let result = engine
            .run_until(
                &PedestrianCost::new(),
                &query(0, &[5.0], OutputKind::Polygon),
                Some(Instant::now()),
            )
            .unwrap();
        assert!(result.truncated);
    }
}
