//! Mode-specific cost models
//!
//! Each travel mode implements `CostModel`: it decides whether an edge is
//! traversable and how many seconds it takes at a given time of day. The
//! engine only ever sees `&dyn CostModel`.

pub mod auto;
pub mod bicycle;
pub mod multimodal;
pub mod pedestrian;

pub use auto::AutoCost;
pub use bicycle::BicycleCost;
pub use multimodal::MultimodalCost;
pub use pedestrian::PedestrianCost;

use std::fmt;
use std::str::FromStr;

use butterfly_common::{Error, Result};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::graph::EdgeAttributes;

/// Travel mode, named the way requests name costings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Auto,
    Bicycle,
    Pedestrian,
    Multimodal,
}

impl TravelMode {
    pub const ALL: [TravelMode; 4] = [
        TravelMode::Auto,
        TravelMode::Bicycle,
        TravelMode::Pedestrian,
        TravelMode::Multimodal,
    ];

    /// Parse a costing name (case-insensitive, with `car`/`bike`/`foot` aliases)
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" | "car" => Ok(Self::Auto),
            "bicycle" | "bike" => Ok(Self::Bicycle),
            "pedestrian" | "foot" => Ok(Self::Pedestrian),
            "multimodal" => Ok(Self::Multimodal),
            _ => Err(Error::unknown_costing(name)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Bicycle => "bicycle",
            Self::Pedestrian => "pedestrian",
            Self::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

/// Wall-clock time of day, wrapping at midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(time: NaiveTime) -> Self {
        Self(time)
    }

    pub fn from_hms(hour: u32, min: u32, sec: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, min, sec).map(Self)
    }

    /// Accepts `HH:MM`, `HH:MM:SS` or an ISO local datetime `YYYY-MM-DDTHH:MM`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").map(|dt| dt.time()))
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid departure time '{value}'")))
    }

    pub fn now_local() -> Self {
        Self(chrono::Local::now().time())
    }

    pub fn seconds_from_midnight(self) -> u32 {
        self.0.num_seconds_from_midnight()
    }

    /// The time `secs` seconds later (millisecond resolution)
    pub fn after_secs(self, secs: f64) -> Self {
        if !secs.is_finite() {
            return self;
        }
        let (time, _) = self
            .0
            .overflowing_add_signed(TimeDelta::milliseconds((secs * 1000.0).round() as i64));
        Self(time)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

/// Pluggable cost model for one travel mode
///
/// Costs are seconds. Implementations must return non-negative finite
/// values; `Ok(None)` means the edge cannot be used by this mode.
pub trait CostModel: Send + Sync {
    fn mode(&self) -> TravelMode;

    /// Seconds to traverse `edge` when entering it at `at`
    fn score(&self, edge: &EdgeAttributes, at: TimeOfDay) -> Result<Option<f64>>;

    /// Seconds spent turning from `inbound` to `outbound` heading (degrees)
    ///
    /// `inbound` is `None` at an origin.
    fn turn_cost(&self, _inbound: Option<f32>, _outbound: f32) -> f64 {
        0.0
    }

    /// Upper bound on network speed, used to size the raster extent
    fn max_speed_mps(&self) -> f64;

    /// Speed used to spread costs off the network and to price origin snapping
    fn off_network_speed_mps(&self) -> f64;
}

/// Build the cost model for `mode`, overriding its off-network speed
pub fn for_mode(mode: TravelMode, off_network_speed_kph: f64) -> Box<dyn CostModel> {
    let off_network_mps = kph_to_mps(off_network_speed_kph);
    match mode {
        TravelMode::Auto => Box::new(AutoCost::new().with_off_network_speed(off_network_mps)),
        TravelMode::Bicycle => Box::new(BicycleCost::new().with_off_network_speed(off_network_mps)),
        TravelMode::Pedestrian => {
            Box::new(PedestrianCost::new().with_off_network_speed(off_network_mps))
        }
        TravelMode::Multimodal => {
            Box::new(MultimodalCost::new().with_off_network_speed(off_network_mps))
        }
    }
}

pub(crate) fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

/// Absolute heading change in degrees, 0..=180
pub(crate) fn heading_change(inbound: f32, outbound: f32) -> f32 {
    let diff = (outbound - inbound).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Seconds for `length_m` at `speed_kph`, rejecting corrupt lengths
pub(crate) fn travel_secs(edge: &EdgeAttributes, speed_kph: f64) -> Result<f64> {
    if !edge.length_m.is_finite() || edge.length_m < 0.0 {
        return Err(Error::Costing(format!(
            "edge length {} is not a finite non-negative distance",
            edge.length_m
        )));
    }
    Ok(edge.length_m / kph_to_mps(speed_kph))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_and_aliases() {
        assert_eq!(TravelMode::from_name("auto").unwrap(), TravelMode::Auto);
        assert_eq!(TravelMode::from_name("Car").unwrap(), TravelMode::Auto);
        assert_eq!(TravelMode::from_name("bike").unwrap(), TravelMode::Bicycle);
        assert_eq!(TravelMode::from_name("foot").unwrap(), TravelMode::Pedestrian);
        assert_eq!("multimodal".parse::<TravelMode>().unwrap(), TravelMode::Multimodal);

        let err = TravelMode::from_name("pedestrain").unwrap_err();
        assert!(err.to_string().contains("did you mean 'pedestrian'"));
    }

    #[test]
    fn test_time_of_day_parse_and_wrap() {
        let t = TimeOfDay::parse("23:50").unwrap();
        assert_eq!(t.seconds_from_midnight(), 23 * 3600 + 50 * 60);
        assert_eq!(t.after_secs(1200.0).seconds_from_midnight(), 10 * 60);

        let iso = TimeOfDay::parse("2026-05-01T08:15").unwrap();
        assert_eq!(iso, TimeOfDay::from_hms(8, 15, 0).unwrap());
        assert!(TimeOfDay::parse("25:99").is_err());
    }

    #[test]
    fn test_heading_change() {
        assert_eq!(heading_change(10.0, 350.0), 20.0);
        assert_eq!(heading_change(90.0, 270.0), 180.0);
        assert_eq!(heading_change(0.0, 90.0), 90.0);
    }

    #[test]
    fn test_factory_uses_off_network_override() {
        for mode in TravelMode::ALL {
            let model = for_mode(mode, 3.6);
            assert_eq!(model.mode(), mode);
            assert!((model.off_network_speed_mps() - 1.0).abs() < 1e-12);
            assert!(model.max_speed_mps() > 0.0);
        }
    }
}
