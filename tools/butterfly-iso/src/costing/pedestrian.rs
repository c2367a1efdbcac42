//! Pedestrian costing

use butterfly_common::Result;

use super::{kph_to_mps, travel_secs, CostModel, TimeOfDay, TravelMode};
use crate::graph::{EdgeAttributes, RoadClass};

pub const WALKING_SPEED_KPH: f64 = 5.1;

/// Steps take twice as long as flat ground
const STEPS_FACTOR: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct PedestrianCost {
    off_network_mps: f64,
}

impl Default for PedestrianCost {
    fn default() -> Self {
        Self::new()
    }
}

impl PedestrianCost {
    pub fn new() -> Self {
        Self {
            off_network_mps: kph_to_mps(4.0),
        }
    }

    pub fn with_off_network_speed(mut self, mps: f64) -> Self {
        self.off_network_mps = mps;
        self
    }
}

impl CostModel for PedestrianCost {
    fn mode(&self) -> TravelMode {
        TravelMode::Pedestrian
    }

    fn score(&self, edge: &EdgeAttributes, _at: TimeOfDay) -> Result<Option<f64>> {
        if edge.road_class.is_motor_only() || edge.road_class == RoadClass::Transit {
            return Ok(None);
        }
        let secs = travel_secs(edge, WALKING_SPEED_KPH)?;
        Ok(Some(if edge.road_class == RoadClass::Steps {
            secs * STEPS_FACTOR
        } else {
            secs
        }))
    }

    fn max_speed_mps(&self) -> f64 {
        kph_to_mps(WALKING_SPEED_KPH)
    }

    fn off_network_speed_mps(&self) -> f64 {
        self.off_network_mps
    }
}
