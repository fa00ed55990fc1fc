use serde::{Deserialize, Serialize};

use crate::error::InvalidModeRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    #[default]
    #[serde(rename = "auto")]
    Automatic,
    Manual,
    Boost,
    #[serde(rename = "timer")]
    Scheduled,
}

impl OperationMode {
    pub const ALL: [OperationMode; 4] = [
        Self::Automatic,
        Self::Manual,
        Self::Boost,
        Self::Scheduled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "auto",
            Self::Manual => "manual",
            Self::Boost => "boost",
            Self::Scheduled => "timer",
        }
    }

    /// Position of the mode in [`OperationMode::ALL`]; used to index the rule arena.
    pub fn index(self) -> usize {
        match self {
            Self::Automatic => 0,
            Self::Manual => 1,
            Self::Boost => 2,
            Self::Scheduled => 3,
        }
    }

    /// Parses an externally supplied mode name.
    ///
    /// Input is trimmed and case-insensitive. `manu` is accepted for manual
    /// because older firmware persisted that spelling.
    pub fn parse(candidate: &str) -> Result<Self, InvalidModeRequest> {
        match candidate.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Automatic),
            "manual" | "manu" => Ok(Self::Manual),
            "boost" => Ok(Self::Boost),
            "timer" => Ok(Self::Scheduled),
            _ => Err(InvalidModeRequest {
                candidate: candidate.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Relay {
    PoolPump,
    SolarPump,
}

impl Relay {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PoolPump => "pool-pump",
            Self::SolarPump => "solar-pump",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayState {
    #[serde(rename = "poolPumpOn")]
    pub pool_pump_on: bool,
    #[serde(rename = "solarPumpOn")]
    pub solar_pump_on: bool,
}

/// Pool and solar loop temperatures in °C. Either value may be NaN when the
/// probe could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "poolTemp")]
    pub pool_temp: f32,
    #[serde(rename = "solarTemp")]
    pub solar_temp: f32,
}

impl SensorReading {
    pub fn new(pool_temp: f32, solar_temp: f32) -> Self {
        Self {
            pool_temp,
            solar_temp,
        }
    }

    pub fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN)
    }

    pub fn is_valid(&self) -> bool {
        self.pool_temp.is_finite() && self.solar_temp.is_finite()
    }
}

impl Default for SensorReading {
    fn default() -> Self {
        Self::invalid()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    #[serde(rename = "poolTemp")]
    pub pool_temp: Option<f32>,
    #[serde(rename = "solarTemp")]
    pub solar_temp: Option<f32>,
    #[serde(rename = "poolMaxTemp")]
    pub pool_max_temp: f32,
    #[serde(rename = "solarMinTemp")]
    pub solar_min_temp: f32,
    pub hysteresis: f32,
    #[serde(rename = "poolVolume")]
    pub pool_volume: f32,
    #[serde(rename = "pumpCapacity")]
    pub pump_capacity: f32,
    #[serde(rename = "useTempDuration")]
    pub use_temperature_duration: bool,
    #[serde(rename = "timerStart")]
    pub timer_start: String,
    #[serde(rename = "timerEnd")]
    pub timer_end: String,
    #[serde(rename = "timezoneIndex")]
    pub timezone_index: usize,
    pub timezone: &'static str,
    #[serde(rename = "poolPumpOn")]
    pub pool_pump_on: bool,
    #[serde(rename = "solarPumpOn")]
    pub solar_pump_on: bool,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    #[serde(rename = "windowActive")]
    pub window_active: bool,
}

impl ControllerStatus {
    pub(crate) fn temperature(value: f32) -> Option<f32> {
        value.is_finite().then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_defined_mode() {
        for mode in OperationMode::ALL {
            assert_eq!(OperationMode::parse(mode.as_str()).unwrap(), mode);
        }
        assert_eq!(
            OperationMode::parse("  MANU ").unwrap(),
            OperationMode::Manual
        );
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = OperationMode::parse("bogus").unwrap_err();
        assert_eq!(err.candidate, "bogus");
    }

    #[test]
    fn reading_with_nan_is_invalid() {
        assert!(!SensorReading::new(f32::NAN, 40.0).is_valid());
        assert!(!SensorReading::new(25.0, f32::INFINITY).is_valid());
        assert!(SensorReading::new(25.0, 40.0).is_valid());
    }
}
