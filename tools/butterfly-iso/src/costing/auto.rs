//! Car costing - road class speed table with turn and U-turn penalties

use butterfly_common::Result;

use super::{heading_change, kph_to_mps, travel_secs, CostModel, TimeOfDay, TravelMode};
use crate::graph::{EdgeAttributes, RoadClass};

/// Posted limits above this are treated as data errors and clamped
const MAX_SPEED_KPH: f64 = 130.0;

/// Unpaved surfaces slow cars down
const UNPAVED_FACTOR: f64 = 1.25;

#[derive(Debug, Clone)]
pub struct AutoCost {
    off_network_mps: f64,
    /// Penalty for a 180 degree change of direction at a node
    u_turn_penalty_s: f64,
    /// Penalty for a right-angle turn; scaled linearly with the angle
    turn_penalty_s: f64,
}

impl Default for AutoCost {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoCost {
    pub fn new() -> Self {
        Self {
            off_network_mps: kph_to_mps(5.0),
            u_turn_penalty_s: 20.0,
            turn_penalty_s: 5.0,
        }
    }

    pub fn with_off_network_speed(mut self, mps: f64) -> Self {
        self.off_network_mps = mps;
        self
    }

    /// Default speed per road class in km/h, `None` when cars may not use it
    fn class_speed_kph(class: RoadClass) -> Option<f64> {
        let kph = match class {
            RoadClass::Motorway => 110.0,
            RoadClass::MotorwayLink => 60.0,
            RoadClass::Trunk => 90.0,
            RoadClass::TrunkLink => 50.0,
            RoadClass::Primary => 70.0,
            RoadClass::Secondary => 60.0,
            RoadClass::Tertiary => 50.0,
            RoadClass::Unclassified => 50.0,
            RoadClass::Residential => 30.0,
            RoadClass::Service => 20.0,
            RoadClass::LivingStreet => 10.0,
            RoadClass::Track
            | RoadClass::Cycleway
            | RoadClass::Footway
            | RoadClass::Path
            | RoadClass::Steps
            | RoadClass::Transit => return None,
        };
        Some(kph)
    }
}

impl CostModel for AutoCost {
    fn mode(&self) -> TravelMode {
        TravelMode::Auto
    }

    fn score(&self, edge: &EdgeAttributes, _at: TimeOfDay) -> Result<Option<f64>> {
        let Some(class_kph) = Self::class_speed_kph(edge.road_class) else {
            return Ok(None);
        };

        let speed_kph = match edge.max_speed_kph {
            Some(limit) if limit > 0.0 => (limit as f64).min(MAX_SPEED_KPH),
            _ => class_kph,
        };

        let secs = travel_secs(edge, speed_kph)?;
        Ok(Some(if edge.paved { secs } else { secs * UNPAVED_FACTOR }))
    }

    fn turn_cost(&self, inbound: Option<f32>, outbound: f32) -> f64 {
        let Some(inbound) = inbound else {
            return 0.0;
        };
        let change = heading_change(inbound, outbound) as f64;
        if change > 150.0 {
            self.u_turn_penalty_s
        } else if change > 30.0 {
            self.turn_penalty_s * change / 90.0
        } else {
            0.0
        }
    }

    fn max_speed_mps(&self) -> f64 {
        kph_to_mps(MAX_SPEED_KPH)
    }

    fn off_network_speed_mps(&self) -> f64 {
        self.off_network_mps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> TimeOfDay {
        TimeOfDay::default()
    }

    #[test]
    fn test_residential_speed() {
        let cost = AutoCost::new();
        let edge = EdgeAttributes::road(RoadClass::Residential, 300.0);
        // 300 m at 30 km/h
        let secs = cost.score(&edge, at()).unwrap().unwrap();
        assert!((secs - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_maxspeed_overrides_class() {
        let cost = AutoCost::new();
        let mut edge = EdgeAttributes::road(RoadClass::Residential, 1000.0);
        edge.max_speed_kph = Some(50.0);
        let secs = cost.score(&edge, at()).unwrap().unwrap();
        assert!((secs - 72.0).abs() < 1e-9);

        edge.max_speed_kph = Some(300.0);
        let clamped = cost.score(&edge, at()).unwrap().unwrap();
        assert!((clamped - 1000.0 / kph_to_mps(MAX_SPEED_KPH)).abs() < 1e-9);
    }

    #[test]
    fn test_no_access() {
        let cost = AutoCost::new();
        for class in [RoadClass::Footway, RoadClass::Cycleway, RoadClass::Transit] {
            let edge = EdgeAttributes::road(class, 100.0);
            assert_eq!(cost.score(&edge, at()).unwrap(), None);
        }
    }

    #[test]
    fn test_corrupt_length_is_error() {
        let cost = AutoCost::new();
        let edge = EdgeAttributes::road(RoadClass::Primary, f64::NAN);
        assert!(cost.score(&edge, at()).is_err());
    }

    #[test]
    fn test_turn_penalties() {
        let cost = AutoCost::new();
        assert_eq!(cost.turn_cost(None, 90.0), 0.0);
        assert_eq!(cost.turn_cost(Some(0.0), 10.0), 0.0);
        assert!((cost.turn_cost(Some(0.0), 90.0) - 5.0).abs() < 1e-9);
        assert_eq!(cost.turn_cost(Some(0.0), 180.0), 20.0);
    }
}
