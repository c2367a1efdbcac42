//! Isochrone request boundary
//!
//! Parses the JSON request, enforces service limits, snaps locations to the
//! graph and turns everything into an `IsochroneQuery` in internal units.

use butterfly_common::{Error, Result};
use geo::Coord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{EngineConfig, ServiceLimits};
use crate::costing::{kph_to_mps, TimeOfDay, TravelMode};
use crate::graph::GraphStore;
use crate::range::{ContourSpec, IsochroneQuery, Origin, OutputKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Location {
    #[schema(example = 52.078937)]
    pub lat: f64,
    #[schema(example = 5.115321)]
    pub lon: f64,
}

impl Location {
    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon,
            y: self.lat,
        }
    }
}

/// One contour: exactly one of `time` (minutes) or `distance` (kilometers)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContourRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = 15.0)]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Hex colour, with or without a leading `#`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IsochroneRequest {
    pub locations: Vec<Location>,
    /// auto, bicycle, pedestrian or multimodal (aliases: car, bike, foot)
    #[serde(default = "default_costing")]
    #[schema(example = "auto")]
    pub costing: String,
    pub contours: Vec<ContourRequest>,
    /// Polygons instead of isolines
    #[serde(default)]
    pub polygons: bool,
    /// Drop rings smaller than this fraction of the largest, in [0, 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoise: Option<f64>,
    /// Simplification tolerance in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generalize: Option<f64>,
    /// Departure as HH:MM, HH:MM:SS or YYYY-MM-DDTHH:MM; defaults to local now
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Add input and snapped locations to the response
    #[serde(default)]
    pub show_locations: bool,
}

fn default_costing() -> String {
    "auto".to_string()
}

/// A request resolved against a graph, ready for the engine
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub mode: TravelMode,
    pub query: IsochroneQuery,
    /// Input locations as lon/lat
    pub locations: Vec<Coord<f64>>,
    /// Snapped node positions as lon/lat, same order as `locations`
    pub snapped: Vec<Coord<f64>>,
    pub show_locations: bool,
}

impl IsochroneRequest {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidInput(format!("malformed request: {e}")))
    }

    pub fn mode(&self) -> Result<TravelMode> {
        TravelMode::from_name(&self.costing)
    }

    /// Reject requests larger than the service allows
    pub fn check_limits(&self, limits: &ServiceLimits) -> Result<()> {
        if self.locations.len() > limits.max_locations {
            return Err(Error::LimitExceeded(format!(
                "{} locations requested, at most {} allowed",
                self.locations.len(),
                limits.max_locations
            )));
        }
        if self.contours.len() > limits.max_contours {
            return Err(Error::LimitExceeded(format!(
                "{} contours requested, at most {} allowed",
                self.contours.len(),
                limits.max_contours
            )));
        }
        for contour in &self.contours {
            if let Some(minutes) = contour.time.filter(|m| *m > limits.max_time_min) {
                return Err(Error::LimitExceeded(format!(
                    "contour time {minutes} min exceeds the limit of {} min",
                    limits.max_time_min
                )));
            }
            if let Some(km) = contour.distance.filter(|km| *km > limits.max_distance_km) {
                return Err(Error::LimitExceeded(format!(
                    "contour distance {km} km exceeds the limit of {} km",
                    limits.max_distance_km
                )));
            }
        }
        Ok(())
    }

    fn contour_specs(&self) -> Result<Vec<ContourSpec>> {
        let kind = if self.polygons {
            OutputKind::Polygon
        } else {
            OutputKind::Isoline
        };
        self.contours
            .iter()
            .map(|c| {
                let spec = match (c.time, c.distance) {
                    (Some(minutes), None) => ContourSpec::time_minutes(minutes, kind),
                    (None, Some(km)) => ContourSpec::distance_km(km, kind),
                    _ => {
                        return Err(Error::InvalidInput(
                            "each contour needs exactly one of time or distance".to_string(),
                        ))
                    }
                };
                Ok(match &c.color {
                    Some(color) => spec.with_color(color.trim_start_matches('#')),
                    None => spec,
                })
            })
            .collect()
    }

    /// Resolve costing, limits, departure and origins against `store`
    ///
    /// Each location snaps to its nearest node; the snap distance is charged
    /// to the origin at the mode's off-network speed.
    pub fn prepare(
        &self,
        store: &dyn GraphStore,
        config: &EngineConfig,
    ) -> Result<PreparedRequest> {
        let mode = self.mode()?;
        self.check_limits(&config.limits)?;
        if self.locations.is_empty() {
            return Err(Error::InvalidInput("at least one location is required".to_string()));
        }
        let contours = self.contour_specs()?;

        let departure = match &self.date_time {
            Some(value) => TimeOfDay::parse(value)?,
            None => TimeOfDay::now_local(),
        };

        let off_network_mps = kph_to_mps(config.grid(mode).off_network_speed_kph);
        let mut origins = Vec::with_capacity(self.locations.len());
        let mut snapped = Vec::with_capacity(self.locations.len());
        for location in &self.locations {
            if !(location.lat.is_finite()
                && location.lon.is_finite()
                && (-90.0..=90.0).contains(&location.lat)
                && (-180.0..=180.0).contains(&location.lon))
            {
                return Err(Error::InvalidInput(format!(
                    "location ({}, {}) is not a valid lat/lon",
                    location.lat, location.lon
                )));
            }
            let (node, distance_m) = store
                .nearest_node(location.to_coord())
                .ok_or(Error::LocationUnreachable)?;
            origins.push(Origin {
                node,
                offset_secs: distance_m / off_network_mps,
                offset_m: distance_m,
            });
            snapped.push(store.position_of(node)?);
        }

        let mut query = IsochroneQuery::new(origins, contours);
        query.departure = departure;
        query.denoise = self.denoise.unwrap_or(0.0);
        query.generalize_m = self.generalize.unwrap_or(0.0);
        query.validate()?;

        Ok(PreparedRequest {
            mode,
            query,
            locations: self.locations.iter().map(|l| l.to_coord()).collect(),
            snapped,
            show_locations: self.show_locations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, MemoryGraph, RoadClass};
    use crate::range::Metric;

    fn street() -> MemoryGraph {
        let mut b = GraphBuilder::new();
        let a = b.add_node(5.1150, 52.0790);
        let c = b.add_node(5.1200, 52.0790);
        b.add_road(a, c, RoadClass::Residential, false, vec![]).unwrap();
        b.build()
    }

    fn request(json: &str) -> IsochroneRequest {
        IsochroneRequest::from_json(json).unwrap()
    }

    /// A request at (52.0, 5.0) with the remaining fields from `rest`
    fn at_origin(rest: &str) -> IsochroneRequest {
        request(&format!(r#"{{"locations":[{{"lat":52.0,"lon":5.0}}],{rest}}}"#))
    }

    #[test]
    fn test_parse_defaults() {
        let req = request(r#"{"locations":[{"lat":52.07,"lon":5.11}],"contours":[{"time":15}]}"#);
        assert_eq!(req.costing, "auto");
        assert!(!req.polygons);
        assert_eq!(req.denoise, None);
        assert!(!req.show_locations);
    }

    #[test]
    fn test_malformed_json_is_invalid_input() {
        let err = IsochroneRequest::from_json(r#"{"locations": 3}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_limits() {
        let limits = ServiceLimits::default();
        let too_long = at_origin(r#""contours":[{"time":121}]"#);
        assert!(matches!(too_long.check_limits(&limits), Err(Error::LimitExceeded(_))));

        let too_far = at_origin(r#""contours":[{"distance":30}]"#);
        assert!(matches!(too_far.check_limits(&limits), Err(Error::LimitExceeded(_))));

        let too_many =
            at_origin(r#""contours":[{"time":1},{"time":2},{"time":3},{"time":4},{"time":5}]"#);
        assert!(matches!(too_many.check_limits(&limits), Err(Error::LimitExceeded(_))));

        let two_places = request(
            r#"{"locations":[{"lat":52.0,"lon":5.0},{"lat":52.1,"lon":5.1}],
                "contours":[{"time":5}]}"#,
        );
        assert!(matches!(two_places.check_limits(&limits), Err(Error::LimitExceeded(_))));
    }

    #[test]
    fn test_prepare_snaps_with_offset() {
        let graph = street();
        let req = request(
            r##"{"locations":[{"lat":52.0791,"lon":5.1150}],"costing":"pedestrian",
                "contours":[{"time":5,"color":"#ff0000"},{"time":10}],"date_time":"08:30",
                "denoise":0.2,"generalize":50}"##,
        );
        let prepared = req.prepare(&graph, &EngineConfig::default()).unwrap();

        assert_eq!(prepared.mode, TravelMode::Pedestrian);
        let origin = prepared.query.origins[0];
        assert_eq!(origin.node, 0);
        // ~11 m off the street at 4 km/h
        assert!((origin.offset_m - 11.1).abs() < 0.5, "{}", origin.offset_m);
        assert!((origin.offset_secs - origin.offset_m / (4.0 / 3.6)).abs() < 1e-9);

        let q = &prepared.query;
        assert_eq!(q.contours[0].threshold, 300.0);
        assert_eq!(q.contours[0].metric, Metric::Time);
        assert_eq!(q.contours[0].style.color.as_deref(), Some("ff0000"));
        assert_eq!(q.contours[1].kind, OutputKind::Isoline);
        assert_eq!(q.departure, TimeOfDay::from_hms(8, 30, 0).unwrap());
        assert_eq!(q.denoise, 0.2);
        assert_eq!(q.generalize_m, 50.0);
        assert_eq!(prepared.snapped[0], Coord { x: 5.1150, y: 52.0790 });
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        let graph = street();
        let config = EngineConfig::default();

        let unknown = at_origin(r#""costing":"pedestiran","contours":[{"time":5}]"#);
        match unknown.prepare(&graph, &config) {
            Err(Error::UnknownCosting { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("pedestrian"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let both = at_origin(r#""contours":[{"time":5,"distance":1}]"#);
        assert!(matches!(both.prepare(&graph, &config), Err(Error::InvalidInput(_))));

        let descending = at_origin(r#""contours":[{"time":10},{"time":5}]"#);
        assert!(matches!(descending.prepare(&graph, &config), Err(Error::InvalidInput(_))));

        let none = request(r#"{"locations":[],"contours":[{"time":5}]}"#);
        assert!(matches!(none.prepare(&graph, &config), Err(Error::InvalidInput(_))));

        let bad_time = at_origin(r#""contours":[{"time":5}],"date_time":"25:99""#);
        assert!(bad_time.prepare(&graph, &config).is_err());
    }

    #[test]
    fn test_empty_graph_is_unreachable() {
        let graph = GraphBuilder::new().build();
        let req = request(r#"{"locations":[{"lat":52.0,"lon":5.0}],"contours":[{"time":5}]}"#);
        assert!(matches!(
            req.prepare(&graph, &EngineConfig::default()),
            Err(Error::LocationUnreachable)
        ));
    }
}
