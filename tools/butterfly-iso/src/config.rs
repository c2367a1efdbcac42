//! Engine configuration: grid presets per mode, assembly policies, service limits
//!
//! Everything has a default; a TOML file may override any subset.

use std::path::Path;

use butterfly_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::costing::TravelMode;

/// Raster settings for one travel mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Finest cell size in meters
    pub cell_size_m: f64,
    /// Cells per axis before the cell size is coarsened
    pub max_cells_per_axis: usize,
    /// 8-neighbour relaxation passes filling the space between streets
    pub spread_passes: usize,
    /// Speed off the network (spreading, origin snapping)
    pub off_network_speed_kph: f64,
}

impl GridConfig {
    pub fn for_car() -> Self {
        Self {
            cell_size_m: 100.0,
            max_cells_per_axis: 1200,
            spread_passes: 2,
            off_network_speed_kph: 5.0,
        }
    }

    pub fn for_bike() -> Self {
        Self {
            cell_size_m: 50.0,
            max_cells_per_axis: 1200,
            spread_passes: 3,
            off_network_speed_kph: 5.0,
        }
    }

    pub fn for_foot() -> Self {
        Self {
            cell_size_m: 25.0,
            max_cells_per_axis: 1200,
            spread_passes: 3,
            off_network_speed_kph: 4.0,
        }
    }

    pub fn for_multimodal() -> Self {
        Self {
            cell_size_m: 50.0,
            max_cells_per_axis: 1200,
            spread_passes: 3,
            off_network_speed_kph: 4.0,
        }
    }

    fn validate(&self, mode: TravelMode) -> Result<()> {
        if !(self.cell_size_m.is_finite() && self.cell_size_m > 0.0) {
            return Err(Error::Config(format!("{mode}: cell_size_m must be positive")));
        }
        if self.max_cells_per_axis < 4 {
            return Err(Error::Config(format!(
                "{mode}: max_cells_per_axis must be at least 4"
            )));
        }
        if !(self.off_network_speed_kph.is_finite() && self.off_network_speed_kph > 0.0) {
            return Err(Error::Config(format!(
                "{mode}: off_network_speed_kph must be positive"
            )));
        }
        Ok(())
    }
}

/// What polygon output does with a contour chain that runs into the grid border
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenRingPolicy {
    /// Close along the grid boundary, counter-clockwise
    #[default]
    Close,
    Discard,
}

/// How polygons of successive thresholds relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolygonNesting {
    /// Every contour is the full area reachable within its threshold
    #[default]
    Cumulative,
    /// Each contour excludes the area of the next lower threshold
    Banded,
}

/// Request limits enforced before any graph work
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLimits {
    pub max_contours: usize,
    pub max_time_min: f64,
    pub max_distance_km: f64,
    pub max_locations: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_contours: 4,
            max_time_min: 120.0,
            max_distance_km: 25.0,
            max_locations: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search bound = largest threshold x (1 + bound_margin)
    pub bound_margin: f64,
    pub auto: GridConfig,
    pub bicycle: GridConfig,
    pub pedestrian: GridConfig,
    pub multimodal: GridConfig,
    pub open_rings: OpenRingPolicy,
    pub nesting: PolygonNesting,
    pub limits: ServiceLimits,
    /// Per-request deadline; expiry returns a truncated result
    pub request_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bound_margin: 0.1,
            auto: GridConfig::for_car(),
            bicycle: GridConfig::for_bike(),
            pedestrian: GridConfig::for_foot(),
            multimodal: GridConfig::for_multimodal(),
            open_rings: OpenRingPolicy::default(),
            nesting: PolygonNesting::default(),
            limits: ServiceLimits::default(),
            request_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn grid(&self, mode: TravelMode) -> &GridConfig {
        match mode {
            TravelMode::Auto => &self.auto,
            TravelMode::Bicycle => &self.bicycle,
            TravelMode::Pedestrian => &self.pedestrian,
            TravelMode::Multimodal => &self.multimodal,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bound_margin.is_finite() && self.bound_margin >= 0.0) {
            return Err(Error::Config("bound_margin must be >= 0".to_string()));
        }
        for mode in TravelMode::ALL {
            self.grid(mode).validate(mode)?;
        }
        Ok(())
    }
}
