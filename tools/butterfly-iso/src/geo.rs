//! Geographic helpers: haversine distance, local metric projection, origin snapping
//!
//! Geographic coordinates are `geo::Coord { x: lon, y: lat }`. Projected
//! coordinates are `geo::Coord { x: east_m, y: north_m }` relative to the
//! projection centre.

use geo::{Coord, Point};
use rstar::{primitives::GeomWithData, RTree};

use crate::graph::NodeId;

#[allow(deprecated)]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    use geo::HaversineDistance;

    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    p1.haversine_distance(&p2)
}

/// Haversine distance between two lon/lat coordinates in meters
pub fn distance_m(a: Coord<f64>, b: Coord<f64>) -> f64 {
    haversine_distance(a.y, a.x, b.y, b.x)
}

/// Equirectangular projection to meters around a reference point
///
/// Accurate to well under a cell at isochrone scale (tens of km); the scale
/// factors are measured once with the haversine formula at the reference latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    center: Coord<f64>,
    m_per_deg_lon: f64,
    m_per_deg_lat: f64,
}

impl LocalProjection {
    pub fn new(center: Coord<f64>) -> Self {
        const STEP_DEG: f64 = 0.01;
        let m_per_deg_lon =
            distance_m(center, Coord { x: center.x + STEP_DEG, y: center.y }) / STEP_DEG;
        let m_per_deg_lat =
            distance_m(center, Coord { x: center.x, y: center.y + STEP_DEG }) / STEP_DEG;

        Self {
            center,
            // Guard the poles, where a degree of longitude has no length
            m_per_deg_lon: m_per_deg_lon.max(1e-6),
            m_per_deg_lat,
        }
    }

    pub fn center(&self) -> Coord<f64> {
        self.center
    }

    /// lon/lat -> meters
    pub fn project(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.center.x) * self.m_per_deg_lon,
            y: (c.y - self.center.y) * self.m_per_deg_lat,
        }
    }

    /// meters -> lon/lat
    pub fn unproject(&self, p: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.center.x + p.x / self.m_per_deg_lon,
            y: self.center.y + p.y / self.m_per_deg_lat,
        }
    }
}

/// Arithmetic mean of a set of coordinates
pub fn centroid(coords: &[Coord<f64>]) -> Option<Coord<f64>> {
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    let (sx, sy) = coords
        .iter()
        .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Some(Coord { x: sx / n, y: sy / n })
}

/// Compass bearing in degrees [0, 360) from `a` to `b` (lon/lat, equirectangular)
pub fn bearing_deg(a: Coord<f64>, b: Coord<f64>) -> f32 {
    let mean_lat = ((a.y + b.y) * 0.5).to_radians();
    let dx = (b.x - a.x) * mean_lat.cos();
    let dy = b.y - a.y;
    let deg = dx.atan2(dy).to_degrees();
    (if deg < 0.0 { deg + 360.0 } else { deg }) as f32
}

/// Nearest-node lookup for correlating request coordinates with the graph
///
/// Uses an R-tree over [lon, lat]; the returned distance is haversine meters.
pub struct NodeSnapper {
    rtree: RTree<GeomWithData<[f64; 2], NodeId>>,
}

impl NodeSnapper {
    pub fn new(nodes: impl IntoIterator<Item = (NodeId, Coord<f64>)>) -> Self {
        let points: Vec<GeomWithData<[f64; 2], NodeId>> = nodes
            .into_iter()
            .map(|(id, c)| GeomWithData::new([c.x, c.y], id))
            .collect();

        Self {
            rtree: RTree::bulk_load(points),
        }
    }

    /// Nearest node to `target` and its distance in meters
    pub fn nearest(&self, target: Coord<f64>) -> Option<(NodeId, f64)> {
        self.rtree.nearest_neighbor(&[target.x, target.y]).map(|p| {
            let [lon, lat] = *p.geom();
            (p.data, haversine_distance(target.y, target.x, lat, lon))
        })
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_roundtrip() {
        let proj = LocalProjection::new(Coord { x: 5.115321, y: 52.078937 });
        let c = Coord { x: 5.13, y: 52.09 };
        let back = proj.unproject(proj.project(c));
        assert!((back.x - c.x).abs() < 1e-9);
        assert!((back.y - c.y).abs() < 1e-9);
    }

    #[test]
    fn test_projection_scale_matches_haversine() {
        let center = Coord { x: 4.35, y: 50.85 };
        let proj = LocalProjection::new(center);
        let c = Coord { x: 4.40, y: 50.88 };
        let p = proj.project(c);
        let planar = (p.x * p.x + p.y * p.y).sqrt();
        let sphere = distance_m(center, c);
        assert!((planar - sphere).abs() / sphere < 0.005);
    }

    #[test]
    fn test_bearing() {
        let o = Coord { x: 0.0, y: 0.0 };
        assert!((bearing_deg(o, Coord { x: 0.0, y: 0.01 }) - 0.0).abs() < 1e-3);
        assert!((bearing_deg(o, Coord { x: 0.01, y: 0.0 }) - 90.0).abs() < 1e-3);
        assert!((bearing_deg(o, Coord { x: 0.0, y: -0.01 }) - 180.0).abs() < 1e-3);
        assert!((bearing_deg(o, Coord { x: -0.01, y: 0.0 }) - 270.0).abs() < 1e-3);
    }

    #[test]
    fn test_snapper_nearest() {
        let snapper = NodeSnapper::new(vec![
            (0, Coord { x: 4.35, y: 50.85 }),
            (1, Coord { x: 4.36, y: 50.85 }),
        ]);
        let (node, dist) = snapper.nearest(Coord { x: 4.359, y: 50.85 }).unwrap();
        assert_eq!(node, 1);
        assert!(dist < 100.0);
        assert_eq!(snapper.len(), 2);
    }
}
