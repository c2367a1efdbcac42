//! GeoJSON output
//!
//! One feature per contour in ascending threshold order, styled for common
//! web map viewers, plus optional location features.

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::range::{ContourGeometry, ContourResult, IsochroneResult, Metric, Ring};
use crate::request::PreparedRequest;

const OPACITY: f64 = 0.33;

type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    MultiPoint { coordinates: Vec<Position> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourProperties {
    /// Minutes for time contours, kilometers for distance contours
    pub contour: f64,
    pub metric: Metric,
    pub color: String,
    pub fill: String,
    #[serde(rename = "fillColor")]
    pub fill_color: String,
    pub opacity: f64,
    #[serde(rename = "fillOpacity")]
    pub fill_opacity: f64,
    #[serde(rename = "fill-opacity")]
    pub fill_opacity_css: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProperties {
    /// `input` or `snapped`
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Properties {
    Contour(ContourProperties),
    Location(LocationProperties),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Properties,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn contour_features(&self) -> impl Iterator<Item = (&ContourProperties, &Geometry)> {
        self.features.iter().filter_map(|f| match &f.properties {
            Properties::Contour(p) => Some((p, &f.geometry)),
            Properties::Location(_) => None,
        })
    }
}

/// Six decimals, about 0.1 m
fn position(c: Coord<f64>) -> Position {
    [(c.x * 1e6).round() / 1e6, (c.y * 1e6).round() / 1e6]
}

fn ring_positions(ring: &Ring) -> Vec<Position> {
    ring.coords.iter().copied().map(position).collect()
}

/// Default colour of contour `index` out of `count`
///
/// Hues are spread evenly at 50% saturation and lightness.
pub fn default_color(index: usize, count: usize) -> String {
    let hue = 360.0 * index as f64 / count.max(1) as f64;
    let (s, l) = (0.5, 0.5);
    let c = (1.0 - (2.0 * l - 1.0_f64).abs()) * s;
    let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_byte = |v: f64| ((v + m) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", to_byte(r), to_byte(g), to_byte(b))
}

fn contour_feature(contour: &ContourResult, index: usize, count: usize) -> Feature {
    let color = match &contour.spec.style.color {
        Some(hex) => format!("#{}", hex.trim_start_matches('#')),
        None => default_color(index, count),
    };
    let value = match contour.spec.metric {
        Metric::Time => contour.spec.threshold / 60.0,
        Metric::Distance => contour.spec.threshold / 1000.0,
    };

    let geometry = match &contour.geometry {
        ContourGeometry::Lines(lines) => {
            let mut lines: Vec<Vec<Position>> = lines
                .iter()
                .map(|l| l.iter().copied().map(position).collect())
                .collect();
            if lines.len() == 1 {
                Geometry::LineString {
                    coordinates: lines.remove(0),
                }
            } else {
                Geometry::MultiLineString { coordinates: lines }
            }
        }
        ContourGeometry::Polygons(shapes) => {
            let mut polygons: Vec<Vec<Vec<Position>>> = shapes
                .iter()
                .map(|s| {
                    std::iter::once(&s.exterior)
                        .chain(s.interiors.iter())
                        .map(ring_positions)
                        .collect()
                })
                .collect();
            if polygons.len() == 1 {
                Geometry::Polygon {
                    coordinates: polygons.remove(0),
                }
            } else {
                Geometry::MultiPolygon {
                    coordinates: polygons,
                }
            }
        }
    };

    Feature {
        kind: "Feature".to_string(),
        properties: Properties::Contour(ContourProperties {
            contour: value,
            metric: contour.spec.metric,
            color: color.clone(),
            fill: color.clone(),
            fill_color: color,
            opacity: OPACITY,
            fill_opacity: OPACITY,
            fill_opacity_css: OPACITY,
        }),
        geometry,
    }
}

fn location_feature(kind: &str, points: &[Coord<f64>]) -> Feature {
    Feature {
        kind: "Feature".to_string(),
        properties: Properties::Location(LocationProperties {
            kind: kind.to_string(),
        }),
        geometry: Geometry::MultiPoint {
            coordinates: points.iter().copied().map(position).collect(),
        },
    }
}

/// Render an engine result as a FeatureCollection
pub fn feature_collection(
    result: &IsochroneResult,
    request: &PreparedRequest,
) -> FeatureCollection {
    let count = result.contours.len();
    let mut features: Vec<Feature> = result
        .contours
        .iter()
        .enumerate()
        .map(|(i, c)| contour_feature(c, i, count))
        .collect();

    if request.show_locations {
        features.push(location_feature("input", &request.locations));
        features.push(location_feature("snapped", &request.snapped));
    }

    FeatureCollection {
        kind: "FeatureCollection".to_string(),
        features,
    }
}
