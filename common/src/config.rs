use serde::{Deserialize, Serialize};

use crate::types::OperationMode;

/// Control interval floor in seconds; shorter intervals are raised to this.
pub const MIN_CONTROL_INTERVAL_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub pool_max_temp: f32,
    pub solar_min_temp: f32,
    pub hysteresis: f32,
    /// Pool volume in m³; zero disables temperature-derived durations.
    pub pool_volume: f32,
    /// Pump capacity in m³/h; zero disables temperature-derived durations.
    pub pump_capacity: f32,
    pub use_duration_from_temperature: bool,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            pool_max_temp: 28.5,
            solar_min_temp: 55.0,
            hysteresis: 1.0,
            pool_volume: 0.0,
            pump_capacity: 0.0,
            use_duration_from_temperature: false,
        }
    }
}

impl ThresholdConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.pool_max_temp = clamp_or(self.pool_max_temp, 0.0, 40.0, defaults.pool_max_temp);
        self.solar_min_temp = clamp_or(self.solar_min_temp, 0.0, 100.0, defaults.solar_min_temp);
        self.hysteresis = clamp_or(self.hysteresis, 0.0, 10.0, defaults.hysteresis);
        self.pool_volume = clamp_or(self.pool_volume, 0.0, 10_000.0, 0.0);
        self.pump_capacity = clamp_or(self.pump_capacity, 0.0, 1_000.0, 0.0);
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Daily timer window. `start > end` describes a span across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start_hour: 10,
            start_minute: 30,
            end_hour: 17,
            end_minute: 30,
        }
    }
}

impl TimeWindow {
    pub fn new(start_hour: u8, start_minute: u8, end_hour: u8, end_minute: u8) -> Self {
        Self {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_hour < 24 && self.end_hour < 24 && self.start_minute < 60 && self.end_minute < 60
    }

    pub fn start_minutes(&self) -> u16 {
        self.start_hour as u16 * 60 + self.start_minute as u16
    }

    pub fn end_minutes(&self) -> u16 {
        self.end_hour as u16 * 60 + self.end_minute as u16
    }

    pub fn crosses_midnight(&self) -> bool {
        (self.start_hour, self.start_minute) > (self.end_hour, self.end_minute)
    }

    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.start_hour > 23 {
            self.start_hour = defaults.start_hour;
        }
        if self.start_minute > 59 {
            self.start_minute = defaults.start_minute;
        }
        if self.end_hour > 23 {
            self.end_hour = defaults.end_hour;
        }
        if self.end_minute > 59 {
            self.end_minute = defaults.end_minute;
        }
    }

    pub fn format_start(&self) -> String {
        format!("{:02}:{:02}", self.start_hour, self.start_minute)
    }

    pub fn format_end(&self) -> String {
        format!("{:02}:{:02}", self.end_hour, self.end_minute)
    }
}

/// Everything that survives a power cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub mode: OperationMode,
    pub thresholds: ThresholdConfig,
    pub window: TimeWindow,
    pub timezone_index: usize,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            mode: OperationMode::Automatic,
            thresholds: ThresholdConfig::default(),
            window: TimeWindow::default(),
            timezone_index: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotLayout {
    /// Known keys are assigned slots up front; unknown keys are rejected.
    Fixed,
    /// Key strings are hashed onto slots. Compatible with devices flashed by
    /// older firmware, at the price of colliding keys overwriting each other.
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageSelection {
    Namespaced { namespace: String },
    Slots { layout: SlotLayout },
}

impl Default for StorageSelection {
    fn default() -> Self {
        Self::Namespaced {
            namespace: crate::store::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "pool-controller".to_string(),
        }
    }
}

/// Inputs fed into the controller once at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub control_interval_secs: u32,
    pub ntp_server: String,
    pub timezone_index: usize,
    pub thresholds: ThresholdConfig,
    pub window: TimeWindow,
    pub mode: OperationMode,
    pub storage: StorageSelection,
    pub mqtt: MqttSettings,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            control_interval_secs: 300,
            ntp_server: "pool.ntp.org".to_string(),
            timezone_index: 0,
            thresholds: ThresholdConfig::default(),
            window: TimeWindow::default(),
            mode: OperationMode::Automatic,
            storage: StorageSelection::default(),
            mqtt: MqttSettings::default(),
        }
    }
}

impl BootConfig {
    pub fn sanitize(&mut self) {
        self.control_interval_secs = self.control_interval_secs.max(MIN_CONTROL_INTERVAL_SECS);
        if self.timezone_index >= crate::timezone::PROFILES.len() {
            self.timezone_index = 0;
        }
        self.thresholds.sanitize();
        self.window.sanitize();
    }

    pub fn control_interval_ms(&self) -> u32 {
        self.control_interval_secs
            .max(MIN_CONTROL_INTERVAL_SECS)
            .saturating_mul(1_000)
    }

    /// Values used when storage holds nothing for a key.
    pub fn initial_state(&self) -> PersistedState {
        PersistedState {
            mode: self.mode,
            thresholds: self.thresholds,
            window: self.window,
            timezone_index: self.timezone_index,
        }
    }
}
