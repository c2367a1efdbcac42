//! Range queries for isochrones
//!
//! Pipeline, each stage consuming the previous stage's output:
//! 1. `traversal` - bounded multi-source expansion over the graph
//! 2. `raster` - settled costs interpolated along edges onto a metric grid
//! 3. `contour` - marching squares per threshold
//! 4. `assemble` - segments chained into rings, outer/hole classification, nesting
//! 5. `simplify` - denoise and Douglas-Peucker generalization
//!
//! `pipeline::IsochroneEngine` drives the stages for one query.

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

pub mod assemble;
pub mod contour;
pub mod pipeline;
pub mod raster;
pub mod simplify;
pub mod traversal;

pub use assemble::{PolygonShape, Ring};
pub use pipeline::{
    ContourGeometry, ContourResult, IsochroneEngine, IsochroneQuery, IsochroneResult,
    IsochroneStats,
};
pub use raster::{CostGrid, GridStats};
pub use traversal::{Reachability, SettledNode, TraversalStats};

/// Where an expansion starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub node: NodeId,
    /// Seconds already spent reaching `node` (e.g. walking from the snapped location)
    pub offset_secs: f64,
    pub offset_m: f64,
}

impl Origin {
    pub fn at_node(node: NodeId) -> Self {
        Self {
            node,
            offset_secs: 0.0,
            offset_m: 0.0,
        }
    }
}

/// What a threshold measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Seconds
    Time,
    /// Meters
    Distance,
}

impl Metric {
    /// Pick this metric's component out of accumulated (seconds, meters)
    pub fn select(self, secs: f64, meters: f64) -> f64 {
        match self {
            Metric::Time => secs,
            Metric::Distance => meters,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Time => "time",
            Metric::Distance => "distance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Isoline,
    Polygon,
}

/// Presentation attributes carried through the engine untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContourStyle {
    pub color: Option<String>,
}

/// One requested contour; `threshold` is seconds or meters depending on `metric`
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSpec {
    pub threshold: f64,
    pub metric: Metric,
    pub kind: OutputKind,
    pub style: ContourStyle,
}

impl ContourSpec {
    pub fn time_minutes(minutes: f64, kind: OutputKind) -> Self {
        Self {
            threshold: minutes * 60.0,
            metric: Metric::Time,
            kind,
            style: ContourStyle::default(),
        }
    }

    pub fn distance_km(km: f64, kind: OutputKind) -> Self {
        Self {
            threshold: km * 1000.0,
            metric: Metric::Distance,
            kind,
            style: ContourStyle::default(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.style.color = Some(color.into());
        self
    }
}
