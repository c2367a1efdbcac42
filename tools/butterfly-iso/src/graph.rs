//! Read-only road graph: the storage seam used by the isochrone engine
//!
//! `GraphStore` is what the engine sees. `MemoryGraph` is a CSR adjacency
//! layout with an R-tree for snapping, loadable from a JSON description or a
//! bincode snapshot.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use butterfly_common::{Error, Result};
use chrono::{NaiveTime, Timelike};
use geo::Coord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geo::{bearing_deg, distance_m, NodeSnapper};

pub type NodeId = u32;

/// Functional road class, mirroring the OSM `highway=*` values the profiles understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadClass {
    Motorway,
    MotorwayLink,
    Trunk,
    TrunkLink,
    Primary,
    Secondary,
    Tertiary,
    Unclassified,
    Residential,
    Service,
    LivingStreet,
    Track,
    Cycleway,
    Footway,
    Path,
    Steps,
    /// Scheduled public transport hop (only multimodal costing uses these)
    Transit,
}

impl RoadClass {
    pub fn from_highway(tag: &str) -> Option<Self> {
        let class = match tag {
            "motorway" => Self::Motorway,
            "motorway_link" => Self::MotorwayLink,
            "trunk" => Self::Trunk,
            "trunk_link" => Self::TrunkLink,
            "primary" | "primary_link" => Self::Primary,
            "secondary" | "secondary_link" => Self::Secondary,
            "tertiary" | "tertiary_link" => Self::Tertiary,
            "unclassified" | "road" => Self::Unclassified,
            "residential" => Self::Residential,
            "service" => Self::Service,
            "living_street" => Self::LivingStreet,
            "track" => Self::Track,
            "cycleway" => Self::Cycleway,
            "footway" | "pedestrian" => Self::Footway,
            "path" | "bridleway" => Self::Path,
            "steps" => Self::Steps,
            _ => return None,
        };
        Some(class)
    }

    /// Motorways and trunk roads, closed to cyclists and pedestrians
    pub fn is_motor_only(self) -> bool {
        matches!(
            self,
            Self::Motorway | Self::MotorwayLink | Self::Trunk | Self::TrunkLink
        )
    }
}

/// Timetable of a transit hop, in seconds from midnight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitSchedule {
    pub first_departure_s: u32,
    pub last_departure_s: u32,
    pub headway_s: u32,
    pub ride_s: u32,
}

impl TransitSchedule {
    /// Seconds from `now_s` until the next departure, `None` after the last one
    pub fn wait_from(&self, now_s: u32) -> Option<u32> {
        if now_s <= self.first_departure_s {
            return Some(self.first_departure_s - now_s);
        }
        if now_s > self.last_departure_s || self.headway_s == 0 {
            return None;
        }
        let since_first = now_s - self.first_departure_s;
        let next = self.first_departure_s + since_first.div_ceil(self.headway_s) * self.headway_s;
        (next <= self.last_departure_s).then(|| next - now_s)
    }
}

/// Everything a cost model may look at when scoring an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    pub length_m: f64,
    pub road_class: RoadClass,
    pub max_speed_kph: Option<f32>,
    pub paved: bool,
    pub transit: Option<TransitSchedule>,
}

impl EdgeAttributes {
    pub fn road(road_class: RoadClass, length_m: f64) -> Self {
        Self {
            length_m,
            road_class,
            max_speed_kph: None,
            paved: true,
            transit: None,
        }
    }

    pub fn transit(length_m: f64, schedule: TransitSchedule) -> Self {
        Self {
            length_m,
            road_class: RoadClass::Transit,
            max_speed_kph: None,
            paved: true,
            transit: Some(schedule),
        }
    }
}

/// A directed edge as stored in the adjacency list of its source node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub target: NodeId,
    pub attrs: EdgeAttributes,
    /// Intermediate shape points as [lon, lat], endpoints excluded
    pub shape: Vec<[f64; 2]>,
    /// Bearing when leaving the source node
    pub depart_heading: f32,
    /// Bearing when arriving at the target node
    pub arrive_heading: f32,
}

/// Storage seam for the traversal and rasterization stages
///
/// Implementations are shared read-only between concurrent requests.
pub trait GraphStore: Send + Sync {
    /// Outgoing edges of `node`; `Error::TileUnavailable` when they cannot be loaded
    fn edges_from(&self, node: NodeId) -> Result<Cow<'_, [GraphEdge]>>;

    /// Position of `node` as lon/lat
    fn position_of(&self, node: NodeId) -> Result<Coord<f64>>;

    /// Closest node to a lon/lat coordinate and its distance in meters
    fn nearest_node(&self, target: Coord<f64>) -> Option<(NodeId, f64)>;
}

/// Accumulates nodes and edges, then freezes them into a `MemoryGraph`
#[derive(Debug, Default)]
pub struct GraphBuilder {
    coords: Vec<Coord<f64>>,
    edges: Vec<(NodeId, GraphEdge)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, lon: f64, lat: f64) -> NodeId {
        self.coords.push(Coord { x: lon, y: lat });
        (self.coords.len() - 1) as NodeId
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    fn coord(&self, node: NodeId) -> Result<Coord<f64>> {
        self.coords
            .get(node as usize)
            .copied()
            .ok_or_else(|| Error::GraphFormat(format!("edge references unknown node {node}")))
    }

    /// Add one directed edge; headings are derived from the geometry
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        attrs: EdgeAttributes,
        shape: Vec<[f64; 2]>,
    ) -> Result<()> {
        let a = self.coord(from)?;
        let b = self.coord(to)?;
        if !attrs.length_m.is_finite() || attrs.length_m < 0.0 {
            return Err(Error::GraphFormat(format!(
                "edge {from}->{to} has invalid length {}",
                attrs.length_m
            )));
        }

        let first = shape.first().map(|p| Coord { x: p[0], y: p[1] }).unwrap_or(b);
        let last = shape.last().map(|p| Coord { x: p[0], y: p[1] }).unwrap_or(a);

        self.edges.push((
            from,
            GraphEdge {
                target: to,
                attrs,
                shape,
                depart_heading: bearing_deg(a, first),
                arrive_heading: bearing_deg(last, b),
            },
        ));
        Ok(())
    }

    /// Add a street between two nodes, both directions unless `oneway`
    ///
    /// Length is the haversine length of the shape.
    pub fn add_road(
        &mut self,
        from: NodeId,
        to: NodeId,
        road_class: RoadClass,
        oneway: bool,
        shape: Vec<[f64; 2]>,
    ) -> Result<()> {
        let attrs = EdgeAttributes::road(road_class, self.shape_length(from, to, &shape)?);
        self.add_road_with(from, to, attrs, oneway, shape)
    }

    fn add_road_with(
        &mut self,
        from: NodeId,
        to: NodeId,
        attrs: EdgeAttributes,
        oneway: bool,
        shape: Vec<[f64; 2]>,
    ) -> Result<()> {
        if !oneway {
            let reversed: Vec<[f64; 2]> = shape.iter().rev().copied().collect();
            self.add_edge(to, from, attrs.clone(), reversed)?;
        }
        self.add_edge(from, to, attrs, shape)
    }

    fn shape_length(&self, from: NodeId, to: NodeId, shape: &[[f64; 2]]) -> Result<f64> {
        let mut points = Vec::with_capacity(shape.len() + 2);
        points.push(self.coord(from)?);
        points.extend(shape.iter().map(|p| Coord { x: p[0], y: p[1] }));
        points.push(self.coord(to)?);
        Ok(points.windows(2).map(|w| distance_m(w[0], w[1])).sum())
    }

    /// Freeze into compressed adjacency (edges grouped by source, insertion order kept)
    pub fn build(self) -> MemoryGraph {
        let n = self.coords.len();
        let mut offsets = vec![0u32; n + 1];
        for (from, _) in &self.edges {
            offsets[*from as usize + 1] += 1;
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let mut edges = self.edges;
        // Stable sort keeps per-node insertion order
        edges.sort_by_key(|(from, _)| *from);
        let edges: Vec<GraphEdge> = edges.into_iter().map(|(_, e)| e).collect();

        MemoryGraph::from_parts(self.coords, offsets, edges)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializableGraph {
    coords: Vec<[f64; 2]>,
    offsets: Vec<u32>,
    edges: Vec<GraphEdge>,
}

/// JSON description of a graph: nodes, OSM-like ways and transit hops
#[derive(Debug, Deserialize)]
struct GraphFile {
    /// [lon, lat] per node; the index is the node id
    nodes: Vec<[f64; 2]>,
    #[serde(default)]
    ways: Vec<WayRecord>,
    #[serde(default)]
    transit: Vec<TransitRecord>,
}

#[derive(Debug, Deserialize)]
struct WayRecord {
    nodes: Vec<NodeId>,
    highway: String,
    #[serde(default)]
    oneway: bool,
    maxspeed: Option<f32>,
    #[serde(default = "default_paved")]
    paved: bool,
}

fn default_paved() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TransitRecord {
    from: NodeId,
    to: NodeId,
    first_departure: String,
    last_departure: String,
    headway_min: f64,
    ride_min: f64,
}

fn parse_clock(value: &str) -> Result<u32> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map(|t| t.num_seconds_from_midnight())
        .map_err(|e| Error::GraphFormat(format!("invalid time '{value}': {e}")))
}

/// In-memory graph with CSR adjacency and an R-tree over node positions
pub struct MemoryGraph {
    coords: Vec<Coord<f64>>,
    offsets: Vec<u32>,
    edges: Vec<GraphEdge>,
    spatial_index: NodeSnapper,
}

impl std::fmt::Debug for MemoryGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl MemoryGraph {
    fn from_parts(coords: Vec<Coord<f64>>, offsets: Vec<u32>, edges: Vec<GraphEdge>) -> Self {
        let spatial_index = NodeSnapper::new(
            coords
                .iter()
                .enumerate()
                .map(|(i, c)| (i as NodeId, *c)),
        );
        Self {
            coords,
            offsets,
            edges,
            spatial_index,
        }
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Parse the JSON graph description
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let file: GraphFile = serde_json::from_reader(reader)
            .map_err(|e| Error::GraphFormat(format!("invalid graph JSON: {e}")))?;

        let mut builder = GraphBuilder::new();
        for [lon, lat] in &file.nodes {
            builder.add_node(*lon, *lat);
        }

        let mut skipped = 0usize;
        for way in &file.ways {
            let Some(road_class) = RoadClass::from_highway(&way.highway) else {
                skipped += 1;
                continue;
            };
            for pair in way.nodes.windows(2) {
                let length_m = builder.shape_length(pair[0], pair[1], &[])?;
                let attrs = EdgeAttributes {
                    length_m,
                    road_class,
                    max_speed_kph: way.maxspeed,
                    paved: way.paved,
                    transit: None,
                };
                builder.add_road_with(pair[0], pair[1], attrs, way.oneway, Vec::new())?;
            }
        }
        if skipped > 0 {
            debug!(skipped, "ignored ways with unsupported highway values");
        }

        for hop in &file.transit {
            if hop.headway_min <= 0.0 || hop.ride_min < 0.0 {
                return Err(Error::GraphFormat(format!(
                    "transit hop {}->{} needs a positive headway and non-negative ride time",
                    hop.from, hop.to
                )));
            }
            let schedule = TransitSchedule {
                first_departure_s: parse_clock(&hop.first_departure)?,
                last_departure_s: parse_clock(&hop.last_departure)?,
                headway_s: (hop.headway_min * 60.0).round() as u32,
                ride_s: (hop.ride_min * 60.0).round() as u32,
            };
            let length_m = builder.shape_length(hop.from, hop.to, &[])?;
            builder.add_edge(
                hop.from,
                hop.to,
                EdgeAttributes::transit(length_m, schedule),
                Vec::new(),
            )?;
        }

        let graph = builder.build();
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built graph from JSON"
        );
        Ok(graph)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_json_reader(BufReader::new(file))
    }

    /// Write a bincode snapshot
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serializable = SerializableGraph {
            coords: self.coords.iter().map(|c| [c.x, c.y]).collect(),
            offsets: self.offsets.clone(),
            edges: self.edges.clone(),
        };

        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &serializable)
            .map_err(|e| Error::GraphFormat(format!("failed to serialize graph: {e}")))?;
        Ok(())
    }

    /// Read a bincode snapshot written by `save`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let serializable: SerializableGraph = bincode::deserialize_from(reader)
            .map_err(|e| Error::GraphFormat(format!("failed to deserialize graph: {e}")))?;

        let n = serializable.coords.len();
        let consistent = serializable.offsets.len() == n + 1
            && serializable.offsets.windows(2).all(|w| w[0] <= w[1])
            && serializable.offsets.last().copied() == Some(serializable.edges.len() as u32)
            && serializable.edges.iter().all(|e| (e.target as usize) < n);
        if !consistent {
            return Err(Error::GraphFormat(
                "graph snapshot has inconsistent adjacency".to_string(),
            ));
        }

        let coords = serializable
            .coords
            .into_iter()
            .map(|[x, y]| Coord { x, y })
            .collect();
        Ok(Self::from_parts(
            coords,
            serializable.offsets,
            serializable.edges,
        ))
    }
}

impl GraphStore for MemoryGraph {
    fn edges_from(&self, node: NodeId) -> Result<Cow<'_, [GraphEdge]>> {
        let i = node as usize;
        if i >= self.coords.len() {
            return Err(Error::TileUnavailable(node));
        }
        let (start, end) = (self.offsets[i] as usize, self.offsets[i + 1] as usize);
        Ok(Cow::Borrowed(&self.edges[start..end]))
    }

    fn position_of(&self, node: NodeId) -> Result<Coord<f64>> {
        self.coords
            .get(node as usize)
            .copied()
            .ok_or(Error::TileUnavailable(node))
    }

    fn nearest_node(&self, target: Coord<f64>) -> Option<(NodeId, f64)> {
        self.spatial_index.nearest(target)
    }
}
