//! Walking plus scheduled transit
//!
//! Transit hops cost the wait for the next departure plus the ride. The wait
//! depends on when the label reaches the stop, so results change with the
//! departure time.

use butterfly_common::{Error, Result};

use super::{kph_to_mps, CostModel, PedestrianCost, TimeOfDay, TravelMode};
use crate::graph::{EdgeAttributes, RoadClass};

/// Fastest transit considered when sizing the raster
const TRANSIT_MAX_SPEED_KPH: f64 = 90.0;

#[derive(Debug, Clone, Default)]
pub struct MultimodalCost {
    walk: PedestrianCost,
}

impl MultimodalCost {
    pub fn new() -> Self {
        Self {
            walk: PedestrianCost::new(),
        }
    }

    pub fn with_off_network_speed(mut self, mps: f64) -> Self {
        self.walk = self.walk.with_off_network_speed(mps);
        self
    }
}

impl CostModel for MultimodalCost {
    fn mode(&self) -> TravelMode {
        TravelMode::Multimodal
    }

    fn score(&self, edge: &EdgeAttributes, at: TimeOfDay) -> Result<Option<f64>> {
        if edge.road_class != RoadClass::Transit {
            return self.walk.score(edge, at);
        }

        let schedule = edge
            .transit
            .ok_or_else(|| Error::Costing("transit edge without a schedule".to_string()))?;

        // After the last departure the hop is unusable
        Ok(schedule
            .wait_from(at.seconds_from_midnight())
            .map(|wait| f64::from(wait) + f64::from(schedule.ride_s)))
    }

    fn max_speed_mps(&self) -> f64 {
        kph_to_mps(TRANSIT_MAX_SPEED_KPH)
    }

    fn off_network_speed_mps(&self) -> f64 {
        self.walk.off_network_speed_mps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TransitSchedule;

    fn hop() -> EdgeAttributes {
        EdgeAttributes::transit(
            3000.0,
            TransitSchedule {
                first_departure_s: 6 * 3600,
                last_departure_s: 22 * 3600,
                headway_s: 600,
                ride_s: 240,
            },
        )
    }

    #[test]
    fn test_wait_depends_on_arrival() {
        let cost = MultimodalCost::new();
        let on_time = cost.score(&hop(), TimeOfDay::from_hms(8, 0, 0).unwrap()).unwrap();
        let just_missed = cost.score(&hop(), TimeOfDay::from_hms(8, 0, 1).unwrap()).unwrap();
        assert_eq!(on_time, Some(240.0));
        assert_eq!(just_missed, Some(599.0 + 240.0));
    }

    #[test]
    fn test_after_service() {
        let cost = MultimodalCost::new();
        let late = cost.score(&hop(), TimeOfDay::from_hms(23, 0, 0).unwrap()).unwrap();
        assert_eq!(late, None);
    }

    #[test]
    fn test_missing_schedule_is_error() {
        let cost = MultimodalCost::new();
        let mut edge = hop();
        edge.transit = None;
        assert!(cost.score(&edge, TimeOfDay::default()).is_err());
    }

    #[test]
    fn test_walks_on_roads() {
        let cost = MultimodalCost::new();
        let edge = EdgeAttributes::road(RoadClass::Residential, 510.0);
        let secs = cost.score(&edge, TimeOfDay::default()).unwrap().unwrap();
        assert!((secs - 360.0).abs() < 1e-9);
    }
}
