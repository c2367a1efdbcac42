//! Isochrones and isodistances over a road graph
//!
//! A request expands a bounded shortest-path tree from its origins
//! (`range::traversal`), interpolates the settled costs onto a metric grid
//! (`range::raster`), traces each threshold with marching squares
//! (`range::contour`) and assembles rings and polygons with holes
//! (`range::assemble`, `range::simplify`).
//!
//! ```no_run
//! use butterfly_iso::{config::EngineConfig, graph::MemoryGraph, request::IsochroneRequest};
//!
//! let graph = MemoryGraph::load_json("city.json")?;
//! let request = IsochroneRequest::from_json(
//!     r#"{"locations":[{"lat":52.0789,"lon":5.1153}],"costing":"pedestrian",
//!         "contours":[{"time":15}],"polygons":true}"#,
//! )?;
//! let geojson = butterfly_iso::isochrone(&graph, &EngineConfig::default(), &request)?;
//! # Ok::<(), butterfly_common::Error>(())
//! ```

pub mod config;
pub mod costing;
pub mod geo;
pub mod geojson;
pub mod graph;
pub mod logging;
pub mod range;
pub mod request;
pub mod server;
pub mod synthetic;

pub use config::EngineConfig;
pub use costing::{CostModel, TimeOfDay, TravelMode};
pub use geojson::FeatureCollection;
pub use graph::{GraphStore, MemoryGraph, NodeId};
pub use range::{IsochroneEngine, IsochroneQuery, IsochroneResult};
pub use request::IsochroneRequest;

use butterfly_common::Result;

/// Answer one request end to end: snap, expand, contour, render
pub fn isochrone(
    store: &dyn GraphStore,
    config: &EngineConfig,
    request: &IsochroneRequest,
) -> Result<FeatureCollection> {
    let prepared = request.prepare(store, config)?;
    let off_network_kph = config.grid(prepared.mode).off_network_speed_kph;
    let costing = costing::for_mode(prepared.mode, off_network_kph);
    let engine = IsochroneEngine::new(store, config.clone());
    let result = engine.run(costing.as_ref(), &prepared.query)?;
    Ok(geojson::feature_collection(&result, &prepared))
}
