//! Bounded multi-source Dijkstra
//!
//! Labels live in an arena and the heap stores `(cost, seq, handle)`.
//! A cheaper label for a node is pushed as a new handle and recorded as the
//! node's best; older handles are skipped when popped. Equal costs pop in
//! insertion order. Labels above the bound are never pushed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use butterfly_common::{Error, Result};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::{Metric, Origin};
use crate::costing::{CostModel, TimeOfDay};
use crate::graph::{GraphStore, NodeId};

#[derive(Debug, Clone, Copy)]
pub struct TraversalParams {
    pub metric: Metric,
    /// Inclusive upper bound on label cost, in metric units
    pub bound: f64,
    pub departure: TimeOfDay,
    pub deadline: Option<Instant>,
}

/// Search state for one path to `node`
#[derive(Debug, Clone, Copy)]
pub struct Label {
    pub node: NodeId,
    pub cost: f64,
    pub secs: f64,
    pub meters: f64,
    pub pred: Option<NodeId>,
    /// Heading on arrival, `None` at an origin
    pub heading: Option<f32>,
    pub seq: u32,
}

/// Final state of a settled node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettledNode {
    pub cost: f64,
    pub secs: f64,
    pub meters: f64,
    pub pred: Option<NodeId>,
    pub heading: Option<f32>,
}

#[derive(Debug, Default, Clone)]
pub struct TraversalStats {
    pub origins_located: usize,
    pub pq_pushes: usize,
    pub pq_pops: usize,
    pub stale_pops: usize,
    pub relaxations: usize,
    pub untraversable_edges: usize,
    pub costing_errors: usize,
    pub unavailable_tiles: usize,
    pub elapsed_ms: u64,
}

/// Settled nodes of one expansion
#[derive(Debug)]
pub struct Reachability {
    settled: FxHashMap<NodeId, SettledNode>,
    order: Vec<NodeId>,
    pub metric: Metric,
    pub bound: f64,
    pub departure: TimeOfDay,
    /// The deadline expired before the queue drained
    pub truncated: bool,
    pub stats: TraversalStats,
}

impl Reachability {
    pub fn get(&self, node: NodeId) -> Option<&SettledNode> {
        self.settled.get(&node)
    }

    pub fn cost_of(&self, node: NodeId) -> Option<f64> {
        self.settled.get(&node).map(|s| s.cost)
    }

    pub fn is_settled(&self, node: NodeId) -> bool {
        self.settled.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Settled nodes in settlement (non-decreasing cost) order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SettledNode)> + '_ {
        self.order
            .iter()
            .filter_map(move |n| self.settled.get(n).map(|s| (*n, s)))
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    cost: f64,
    seq: u32,
    handle: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap, we pop the cheapest, oldest first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Search {
    arena: Vec<Label>,
    best: FxHashMap<NodeId, u32>,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u32,
}

impl Search {
    fn new() -> Self {
        Self {
            arena: Vec::new(),
            best: FxHashMap::default(),
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Push `label` if it beats the node's current best; returns whether it did
    fn offer(&mut self, mut label: Label) -> bool {
        if let Some(&h) = self.best.get(&label.node) {
            if self.arena[h as usize].cost <= label.cost {
                return false;
            }
        }
        label.seq = self.next_seq;
        self.next_seq += 1;

        let handle = self.arena.len() as u32;
        self.arena.push(label);
        self.best.insert(label.node, handle);
        self.heap.push(HeapEntry {
            cost: label.cost,
            seq: label.seq,
            handle,
        });
        true
    }
}

/// Expand from `origins` until every label within `params.bound` is settled
///
/// Collaborator faults are absorbed: an unavailable tile contributes no
/// edges and a costing error makes that one edge untraversable. Fails only
/// when no origin can be located at all.
pub fn expand(
    store: &dyn GraphStore,
    costing: &dyn CostModel,
    origins: &[Origin],
    params: &TraversalParams,
) -> Result<Reachability> {
    let start = Instant::now();
    let mut stats = TraversalStats::default();
    let mut search = Search::new();

    for origin in origins {
        let located = store
            .position_of(origin.node)
            .and_then(|_| store.edges_from(origin.node).map(|_| ()));
        if let Err(e) = located {
            warn!(node = origin.node, error = %e, "origin could not be located");
            continue;
        }
        stats.origins_located += 1;

        let cost = params.metric.select(origin.offset_secs, origin.offset_m);
        if cost > params.bound {
            continue;
        }
        if search.offer(Label {
            node: origin.node,
            cost,
            secs: origin.offset_secs,
            meters: origin.offset_m,
            pred: None,
            heading: None,
            seq: 0,
        }) {
            stats.pq_pushes += 1;
        }
    }

    if stats.origins_located == 0 {
        return Err(Error::LocationUnreachable);
    }

    let mut settled: FxHashMap<NodeId, SettledNode> = FxHashMap::default();
    let mut order = Vec::new();
    let mut truncated = false;

    while let Some(entry) = search.heap.pop() {
        stats.pq_pops += 1;
        let label = search.arena[entry.handle as usize];

        let is_best = search.best.get(&label.node) == Some(&entry.handle);
        if !is_best || settled.contains_key(&label.node) {
            stats.stale_pops += 1;
            continue;
        }
        if label.cost > params.bound {
            break;
        }
        if params.deadline.is_some_and(|d| Instant::now() >= d) {
            truncated = true;
            break;
        }

        settled.insert(
            label.node,
            SettledNode {
                cost: label.cost,
                secs: label.secs,
                meters: label.meters,
                pred: label.pred,
                heading: label.heading,
            },
        );
        order.push(label.node);

        let edges = match store.edges_from(label.node) {
            Ok(edges) => edges,
            Err(e) => {
                stats.unavailable_tiles += 1;
                warn!(node = label.node, error = %e, "no edges for settled node");
                continue;
            }
        };

        let at = params.departure.after_secs(label.secs);
        for edge in edges.iter() {
            if settled.contains_key(&edge.target) {
                continue;
            }
            stats.relaxations += 1;

            let edge_secs = match costing.score(&edge.attrs, at) {
                Ok(Some(secs)) if secs.is_finite() && secs >= 0.0 => secs,
                Ok(Some(secs)) => {
                    stats.costing_errors += 1;
                    debug!(
                        from = label.node,
                        to = edge.target,
                        secs,
                        "cost model returned an invalid cost"
                    );
                    continue;
                }
                Ok(None) => {
                    stats.untraversable_edges += 1;
                    continue;
                }
                Err(e) => {
                    stats.costing_errors += 1;
                    debug!(from = label.node, to = edge.target, error = %e, "edge skipped");
                    continue;
                }
            };

            let turn = costing.turn_cost(label.heading, edge.depart_heading);
            let secs = label.secs + edge_secs + turn;
            let meters = label.meters + edge.attrs.length_m;
            let cost = params.metric.select(secs, meters);
            if cost > params.bound {
                continue;
            }

            if search.offer(Label {
                node: edge.target,
                cost,
                secs,
                meters,
                pred: Some(label.node),
                heading: Some(edge.arrive_heading),
                seq: 0,
            }) {
                stats.pq_pushes += 1;
            }
        }
    }

    stats.elapsed_ms = start.elapsed().as_millis() as u64;
    debug!(
        settled = order.len(),
        pushes = stats.pq_pushes,
        pops = stats.pq_pops,
        truncated,
        "expansion finished"
    );

    Ok(Reachability {
        settled,
        order,
        metric: params.metric,
        bound: params.bound,
        departure: params.departure,
        truncated,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use geo::Coord;

    use super::*;
    use crate::costing::{PedestrianCost, TravelMode};
    use crate::graph::{EdgeAttributes, GraphBuilder, GraphEdge, MemoryGraph, RoadClass};

    /// 0 - 1 - 2 - 3 along a parallel, ~70 m apart, plus a footway 0 - 4
    fn line_graph() -> MemoryGraph {
        let mut b = GraphBuilder::new();
        for i in 0..4 {
            b.add_node(4.35 + 0.001 * i as f64, 50.85);
        }
        b.add_node(4.35, 50.851);
        for i in 0..3 {
            b.add_road(i, i + 1, RoadClass::Residential, false, vec![]).unwrap();
        }
        b.add_road(0, 4, RoadClass::Footway, false, vec![]).unwrap();
        b.build()
    }

    /// A block: 0 - 1 - 2 on residential streets, 0 - 3 - 2 on footways, then 2 - 4
    fn block_graph() -> MemoryGraph {
        let mut b = GraphBuilder::new();
        b.add_node(4.350, 50.850);
        b.add_node(4.351, 50.850);
        b.add_node(4.351, 50.851);
        b.add_node(4.350, 50.851);
        b.add_node(4.352, 50.851);
        b.add_road(0, 1, RoadClass::Residential, false, vec![]).unwrap();
        b.add_road(1, 2, RoadClass::Residential, false, vec![]).unwrap();
        b.add_road(0, 3, RoadClass::Footway, false, vec![]).unwrap();
        b.add_road(3, 2, RoadClass::Footway, false, vec![]).unwrap();
        b.add_road(2, 4, RoadClass::Footway, false, vec![]).unwrap();
        b.build()
    }

    /// Serves `inner`, except that the edges of `broken` cannot be fetched
    struct MissingTile<'a> {
        inner: &'a MemoryGraph,
        broken: NodeId,
    }

    impl GraphStore for MissingTile<'_> {
        fn edges_from(&self, node: NodeId) -> Result<Cow<'_, [GraphEdge]>> {
            if node == self.broken {
                return Err(Error::TileUnavailable(node));
            }
            self.inner.edges_from(node)
        }

        fn position_of(&self, node: NodeId) -> Result<Coord<f64>> {
            self.inner.position_of(node)
        }

        fn nearest_node(&self, target: Coord<f64>) -> Option<(NodeId, f64)> {
            self.inner.nearest_node(target)
        }
    }

    /// Walking costs, but residential streets fail to score
    struct NoResidential(PedestrianCost);

    impl CostModel for NoResidential {
        fn mode(&self) -> TravelMode {
            TravelMode::Pedestrian
        }

        fn score(&self, edge: &EdgeAttributes, at: TimeOfDay) -> Result<Option<f64>> {
            if edge.road_class == RoadClass::Residential {
                return Err(Error::Costing("no speed for residential".to_string()));
            }
            self.0.score(edge, at)
        }

        fn max_speed_mps(&self) -> f64 {
            self.0.max_speed_mps()
        }

        fn off_network_speed_mps(&self) -> f64 {
            self.0.off_network_speed_mps()
        }
    }

    fn params(bound: f64) -> TraversalParams {
        TraversalParams {
            metric: Metric::Time,
            bound,
            departure: TimeOfDay::default(),
            deadline: None,
        }
    }

    fn walk(graph: &dyn GraphStore, origins: &[NodeId], bound: f64) -> Reachability {
        let origins: Vec<Origin> = origins.iter().map(|&n| Origin::at_node(n)).collect();
        expand(graph, &PedestrianCost::new(), &origins, &params(bound)).unwrap()
    }

    #[test]
    fn test_costs_accumulate() {
        let graph = line_graph();
        let reach = walk(&graph, &[0], 1e6);
        assert_eq!(reach.len(), 5);

        let c1 = reach.cost_of(1).unwrap();
        let c3 = reach.cost_of(3).unwrap();
        assert!((c3 - 3.0 * c1).abs() < 1e-6);
        assert_eq!(reach.get(3).unwrap().pred, Some(2));
        assert_eq!(reach.get(0).unwrap().pred, None);
    }

    #[test]
    fn test_bound_prunes() {
        let graph = line_graph();
        let full = walk(&graph, &[0], 1e6);
        let bound = full.cost_of(2).unwrap() + 1.0;
        let reach = walk(&graph, &[0], bound);
        assert!(reach.is_settled(2));
        assert!(!reach.is_settled(3));
        assert!(reach.iter().all(|(_, s)| s.cost <= bound));
    }

    #[test]
    fn test_settlement_order_is_monotone() {
        let graph = line_graph();
        let reach = walk(&graph, &[1], 1e6);
        let costs: Vec<f64> = reach.iter().map(|(_, s)| s.cost).collect();
        assert!(costs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_two_origins_take_minimum() {
        let graph = line_graph();
        let a = walk(&graph, &[0], 1e6);
        let b = walk(&graph, &[3], 1e6);
        let ab = walk(&graph, &[0, 3], 1e6);
        let ba = walk(&graph, &[3, 0], 1e6);

        for node in 0..5 {
            let expected = a.cost_of(node).unwrap().min(b.cost_of(node).unwrap());
            assert!((ab.cost_of(node).unwrap() - expected).abs() < 1e-9);
            assert_eq!(ab.cost_of(node), ba.cost_of(node));
        }
    }

    #[test]
    fn test_unlocatable_origins() {
        let graph = line_graph();
        let cost = PedestrianCost::new();
        let err = expand(&graph, &cost, &[Origin::at_node(77)], &params(100.0)).unwrap_err();
        assert!(matches!(err, Error::LocationUnreachable));

        // One good origin is enough
        let reach = walk(&graph, &[77, 0], 100.0);
        assert_eq!(reach.stats.origins_located, 1);
        assert!(reach.is_settled(0));
    }

    #[test]
    fn test_missing_tile_only_stops_that_node() {
        let graph = block_graph();
        let store = MissingTile {
            inner: &graph,
            broken: 1,
        };
        let reach = walk(&store, &[0], 1e6);

        // Node 1 is reached but contributes no edges; 2 and 4 come through the footways
        assert!(reach.is_settled(1));
        assert_eq!(reach.get(2).unwrap().pred, Some(3));
        assert!(reach.is_settled(4));
        assert_eq!(reach.stats.unavailable_tiles, 1);
        assert_eq!(reach.stats.costing_errors, 0);
    }

    #[test]
    fn test_missing_origin_tile_is_unreachable() {
        let graph = block_graph();
        let store = MissingTile {
            inner: &graph,
            broken: 0,
        };
        let cost = PedestrianCost::new();
        let err = expand(&store, &cost, &[Origin::at_node(0)], &params(1e6)).unwrap_err();
        assert!(matches!(err, Error::LocationUnreachable));
    }

    #[test]
    fn test_costing_error_skips_only_that_edge() {
        let graph = block_graph();
        let cost = NoResidential(PedestrianCost::new());
        let reach = expand(&graph, &cost, &[Origin::at_node(0)], &params(1e6)).unwrap();

        assert!(!reach.is_settled(1));
        assert_eq!(reach.get(2).unwrap().pred, Some(3));
        assert!(reach.is_settled(4));
        // 0 -> 1 and 2 -> 1
        assert_eq!(reach.stats.costing_errors, 2);
        assert_eq!(reach.stats.unavailable_tiles, 0);
    }

    #[test]
    fn test_origin_offset_counts() {
        let graph = line_graph();
        let mut origin = Origin::at_node(0);
        origin.offset_secs = 30.0;
        let reach = expand(&graph, &PedestrianCost::new(), &[origin], &params(1e6)).unwrap();
        assert_eq!(reach.cost_of(0), Some(30.0));

        // Offset beyond the bound: located, nothing settled
        let reach = expand(&graph, &PedestrianCost::new(), &[origin], &params(10.0)).unwrap();
        assert!(reach.is_empty());
    }

    #[test]
    fn test_distance_metric() {
        let graph = line_graph();
        let p = TraversalParams {
            metric: Metric::Distance,
            ..params(1e6)
        };
        let reach = expand(&graph, &PedestrianCost::new(), &[Origin::at_node(0)], &p).unwrap();
        let edge_len = graph.edges_from(0).unwrap()[0].attrs.length_m;
        assert!((reach.cost_of(1).unwrap() - edge_len).abs() < 1e-9);
    }

    #[test]
    fn test_expired_deadline_truncates() {
        let graph = line_graph();
        let p = TraversalParams {
            deadline: Some(Instant::now()),
            ..params(1e6)
        };
        let reach = expand(&graph, &PedestrianCost::new(), &[Origin::at_node(0)], &p).unwrap();
        assert!(reach.truncated);
        assert!(reach.len() < 5);
    }

    #[test]
    fn test_heap_pops_fifo_on_ties() {
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry { cost: 1.0, seq: 2, handle: 2 });
        heap.push(HeapEntry { cost: 1.0, seq: 1, handle: 1 });
        heap.push(HeapEntry { cost: 0.5, seq: 3, handle: 3 });
        let handles: Vec<u32> = std::iter::from_fn(|| heap.pop().map(|e| e.handle)).collect();
        assert_eq!(handles, vec![3, 1, 2]);
    }
}
