//! Polygon assembly: chain segments into rings, classify and nest them
//!
//! Outer rings are counter-clockwise, holes clockwise. Nesting is kept as
//! indices (`PolygonShape::parent`), never as pointers.

use geo::{Contains, Coord, LineString, Point, Polygon, Rect};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::contour::Segment;
use crate::config::OpenRingPolicy;

/// Closed coordinate sequence, first == last
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    pub coords: Vec<Coord<f64>>,
}

impl Ring {
    /// Close `coords` if needed
    pub fn new(mut coords: Vec<Coord<f64>>) -> Self {
        if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
            if first != last {
                coords.push(first);
            }
        }
        Self { coords }
    }

    /// Shoelace area, positive for counter-clockwise
    pub fn signed_area(&self) -> f64 {
        self.coords
            .windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum::<f64>()
            * 0.5
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn is_ccw(&self) -> bool {
        self.signed_area() > 0.0
    }

    pub fn reversed(&self) -> Ring {
        Ring {
            coords: self.coords.iter().rev().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(LineString::new(self.coords.clone()), vec![])
    }

    pub fn map_coords(&self, f: impl Fn(Coord<f64>) -> Coord<f64>) -> Ring {
        Ring {
            coords: self.coords.iter().map(|c| f(*c)).collect(),
        }
    }
}

/// One outer ring with its holes
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonShape {
    pub exterior: Ring,
    pub interiors: Vec<Ring>,
    /// Index of the enclosing polygon at the next higher threshold
    pub parent: Option<usize>,
}

impl PolygonShape {
    pub fn new(exterior: Ring) -> Self {
        Self {
            exterior,
            interiors: Vec::new(),
            parent: None,
        }
    }
}

/// Segments chained end to start
#[derive(Debug, Default)]
pub struct Chains {
    pub closed: Vec<Ring>,
    /// Chains that ran into the grid border, start to end
    pub open: Vec<Vec<Coord<f64>>>,
}

type Key = (i64, i64);

fn key(p: Coord<f64>, epsilon: f64) -> Key {
    ((p.x / epsilon).round() as i64, (p.y / epsilon).round() as i64)
}

fn take_unused(index: &FxHashMap<Key, Vec<usize>>, k: Key, used: &mut [bool]) -> Option<usize> {
    let found = index.get(&k)?.iter().copied().find(|&i| !used[i])?;
    used[found] = true;
    Some(found)
}

/// Join oriented segments whose endpoints match within `epsilon`
pub fn chain_segments(segments: &[Segment], epsilon: f64) -> Chains {
    let mut starts: FxHashMap<Key, Vec<usize>> = FxHashMap::default();
    let mut ends: FxHashMap<Key, Vec<usize>> = FxHashMap::default();
    for (i, s) in segments.iter().enumerate() {
        starts.entry(key(s.a, epsilon)).or_default().push(i);
        ends.entry(key(s.b, epsilon)).or_default().push(i);
    }

    let mut used = vec![false; segments.len()];
    let mut chains = Chains::default();

    for i in 0..segments.len() {
        if used[i] {
            continue;
        }
        used[i] = true;

        let first = segments[i].a;
        let first_key = key(first, epsilon);
        let mut forward = vec![first, segments[i].b];
        let mut closed = false;

        loop {
            let Some(&tail) = forward.last() else { break };
            let k = key(tail, epsilon);
            if k == first_key {
                closed = true;
                break;
            }
            match take_unused(&starts, k, &mut used) {
                Some(j) => forward.push(segments[j].b),
                None => break,
            }
        }

        if closed {
            // Snap the closing point exactly onto the start
            if let Some(last) = forward.last_mut() {
                *last = first;
            }
            if forward.len() >= 4 {
                chains.closed.push(Ring { coords: forward });
            }
            continue;
        }

        // Extend backwards from the start
        let mut backward = Vec::new();
        let mut head = first;
        while let Some(j) = take_unused(&ends, key(head, epsilon), &mut used) {
            head = segments[j].a;
            backward.push(head);
        }
        backward.reverse();
        backward.extend(forward);
        chains.open.push(backward);
    }

    chains
}

/// Position along the rectangle boundary, counter-clockwise from the bottom-left corner
fn perimeter_position(p: Coord<f64>, rect: &Rect<f64>) -> f64 {
    let (min, max) = (rect.min(), rect.max());
    let (w, h) = (rect.width(), rect.height());

    let d_bottom = (p.y - min.y).abs();
    let d_right = (max.x - p.x).abs();
    let d_top = (max.y - p.y).abs();
    let d_left = (p.x - min.x).abs();
    let nearest = d_bottom.min(d_right).min(d_top).min(d_left);

    if nearest == d_bottom {
        (p.x - min.x).clamp(0.0, w)
    } else if nearest == d_right {
        w + (p.y - min.y).clamp(0.0, h)
    } else if nearest == d_top {
        w + h + (max.x - p.x).clamp(0.0, w)
    } else {
        2.0 * w + h + (max.y - p.y).clamp(0.0, h)
    }
}

/// Close an open chain along the rectangle boundary, counter-clockwise from its end to its start
pub fn close_along_boundary(chain: &[Coord<f64>], rect: &Rect<f64>) -> Option<Ring> {
    let (&start, &end) = (chain.first()?, chain.last()?);
    let (min, max) = (rect.min(), rect.max());
    let (w, h) = (rect.width(), rect.height());
    let perimeter = 2.0 * (w + h);

    let corners = [
        (w, Coord { x: max.x, y: min.y }),
        (w + h, Coord { x: max.x, y: max.y }),
        (2.0 * w + h, Coord { x: min.x, y: max.y }),
        (perimeter, Coord { x: min.x, y: min.y }),
    ];

    let from = perimeter_position(end, rect);
    let mut to = perimeter_position(start, rect);
    if to <= from {
        to += perimeter;
    }

    let mut coords = chain.to_vec();
    // Corners may be passed on the first lap or, after wrapping, the second
    for lap in [0.0, perimeter] {
        for (pos, corner) in corners {
            let pos = pos + lap;
            if pos > from && pos < to {
                coords.push(corner);
            }
        }
    }
    coords.push(start);

    let ring = Ring { coords };
    (ring.len() >= 4).then_some(ring)
}

/// Rings for polygon output: closed chains plus open chains handled per `policy`
pub fn close_chains(chains: Chains, rect: &Rect<f64>, policy: OpenRingPolicy) -> Vec<Ring> {
    let mut rings = chains.closed;
    if !chains.open.is_empty() {
        debug!(open = chains.open.len(), ?policy, "contour chains reached the grid border");
    }
    if policy == OpenRingPolicy::Close {
        rings.extend(
            chains
                .open
                .iter()
                .filter_map(|chain| close_along_boundary(chain, rect)),
        );
    }
    rings
}

fn contains_any(polygon: &Polygon<f64>, ring: &Ring) -> bool {
    ring.coords
        .iter()
        .any(|c| polygon.contains(&Point::from(*c)))
}

/// Classify rings by winding and attach each hole to its smallest enclosing outer ring
///
/// Holes with no enclosing outer ring are dropped.
pub fn build_polygons(rings: Vec<Ring>) -> Vec<PolygonShape> {
    let mut outers = Vec::new();
    let mut holes = Vec::new();
    for ring in rings {
        let area = ring.signed_area();
        if area > 0.0 {
            outers.push(ring);
        } else if area < 0.0 {
            holes.push(ring);
        }
    }

    let outer_polys: Vec<Polygon<f64>> = outers.iter().map(Ring::to_polygon).collect();
    let outer_areas: Vec<f64> = outers.iter().map(Ring::area).collect();
    let mut shapes: Vec<PolygonShape> = outers.into_iter().map(PolygonShape::new).collect();

    let mut orphans = 0usize;
    for hole in holes {
        let owner = outer_polys
            .iter()
            .enumerate()
            .filter(|(_, poly)| contains_any(poly, &hole))
            .min_by(|(a, _), (b, _)| outer_areas[*a].total_cmp(&outer_areas[*b]))
            .map(|(i, _)| i);
        match owner {
            Some(i) => shapes[i].interiors.push(hole),
            None => orphans += 1,
        }
    }
    if orphans > 0 {
        debug!(orphans, "dropped holes without an enclosing ring");
    }

    shapes
}

/// Record, for every polygon, its smallest enclosing polygon at the next level
///
/// `levels` are in ascending threshold order.
pub fn link_levels(levels: &mut [Vec<PolygonShape>]) {
    for i in 0..levels.len().saturating_sub(1) {
        let (lower, upper) = levels.split_at_mut(i + 1);
        let (lower, upper) = (&mut lower[i], &upper[0]);

        let upper_polys: Vec<Polygon<f64>> =
            upper.iter().map(|s| s.exterior.to_polygon()).collect();
        for shape in lower.iter_mut() {
            shape.parent = upper_polys
                .iter()
                .enumerate()
                .filter(|(_, poly)| contains_any(poly, &shape.exterior))
                .min_by(|(a, _), (b, _)| {
                    upper[*a].exterior.area().total_cmp(&upper[*b].exterior.area())
                })
                .map(|(i, _)| i);
        }
    }
}

/// Turn linked cumulative levels into bands: level i+1 minus level i
///
/// Each outer ring of level i becomes a hole of its parent; each hole of
/// level i becomes an outer ring of level i+1, taking over the level i+1
/// holes that lie inside it.
pub fn into_bands(levels: Vec<Vec<PolygonShape>>) -> Vec<Vec<PolygonShape>> {
    let mut bands = levels.clone();

    for i in 0..levels.len().saturating_sub(1) {
        let upper = &levels[i + 1];
        for shape in &levels[i] {
            let Some(parent) = shape.parent else {
                continue;
            };
            let inner = shape.exterior.to_polygon();

            // Upper holes inside this ring now sit inside a hole of the band
            bands[i + 1][parent]
                .interiors
                .retain(|h| !contains_any(&inner, h));
            bands[i + 1][parent].interiors.push(shape.exterior.reversed());

            for hole in &shape.interiors {
                let hole_poly = hole.reversed().to_polygon();
                let mut band = PolygonShape::new(hole.reversed());
                band.interiors = upper[parent]
                    .interiors
                    .iter()
                    .filter(|h| contains_any(&hole_poly, h))
                    .cloned()
                    .collect();
                band.parent = upper[parent].parent;
                bands[i + 1].push(band);
            }
        }
    }

    bands
}
