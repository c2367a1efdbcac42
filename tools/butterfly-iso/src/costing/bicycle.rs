//! Bicycle costing

use butterfly_common::Result;

use super::{heading_change, kph_to_mps, travel_secs, CostModel, TimeOfDay, TravelMode};
use crate::graph::{EdgeAttributes, RoadClass};

const BASE_SPEED_KPH: f64 = 18.0;
const CYCLEWAY_SPEED_KPH: f64 = 20.0;
const UNPAVED_FACTOR: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct BicycleCost {
    off_network_mps: f64,
    u_turn_penalty_s: f64,
}

impl Default for BicycleCost {
    fn default() -> Self {
        Self::new()
    }
}

impl BicycleCost {
    pub fn new() -> Self {
        Self {
            off_network_mps: kph_to_mps(5.0),
            u_turn_penalty_s: 5.0,
        }
    }

    pub fn with_off_network_speed(mut self, mps: f64) -> Self {
        self.off_network_mps = mps;
        self
    }

    fn class_speed_kph(class: RoadClass) -> Option<f64> {
        if class.is_motor_only() {
            return None;
        }
        let kph = match class {
            RoadClass::Cycleway => CYCLEWAY_SPEED_KPH,
            RoadClass::Path | RoadClass::Footway => 15.0,
            RoadClass::Service | RoadClass::LivingStreet => 15.0,
            RoadClass::Track => 12.0,
            RoadClass::Steps | RoadClass::Transit => return None,
            _ => BASE_SPEED_KPH,
        };
        Some(kph)
    }
}

impl CostModel for BicycleCost {
    fn mode(&self) -> TravelMode {
        TravelMode::Bicycle
    }

    fn score(&self, edge: &EdgeAttributes, _at: TimeOfDay) -> Result<Option<f64>> {
        let Some(kph) = Self::class_speed_kph(edge.road_class) else {
            return Ok(None);
        };
        let secs = travel_secs(edge, kph)?;
        Ok(Some(if edge.paved { secs } else { secs * UNPAVED_FACTOR }))
    }

    fn turn_cost(&self, inbound: Option<f32>, outbound: f32) -> f64 {
        match inbound {
            Some(h) if heading_change(h, outbound) > 150.0 => self.u_turn_penalty_s,
            _ => 0.0,
        }
    }

    fn max_speed_mps(&self) -> f64 {
        kph_to_mps(CYCLEWAY_SPEED_KPH)
    }

    fn off_network_speed_mps(&self) -> f64 {
        self.off_network_mps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_speed() {
        let cost = BicycleCost::new();
        let edge = EdgeAttributes::road(RoadClass::Residential, 500.0);
        let secs = cost.score(&edge, TimeOfDay::default()).unwrap().unwrap();
        assert!((secs - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_surface_penalty() {
        let cost = BicycleCost::new();
        let mut edge = EdgeAttributes::road(RoadClass::Residential, 500.0);
        edge.paved = false;
        let secs = cost.score(&edge, TimeOfDay::default()).unwrap().unwrap();
        assert!((secs - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_motorways() {
        let cost = BicycleCost::new();
        for class in [RoadClass::Motorway, RoadClass::TrunkLink, RoadClass::Transit] {
            let edge = EdgeAttributes::road(class, 100.0);
            assert_eq!(cost.score(&edge, TimeOfDay::default()).unwrap(), None);
        }
    }
}
