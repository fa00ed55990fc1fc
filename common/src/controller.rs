use tracing::{debug, info, warn};

use crate::{
    clock::{elapsed_ticks, TimeSource},
    config::{BootConfig, PersistedState, ThresholdConfig, TimeWindow},
    error::{ErrorKind, InvalidModeRequest, PersistenceError, ValidationError},
    ports::{Devices, NetworkTime},
    rules::{ControlRule, RelayCommand, RuleContext, RuleSet},
    schedule,
    store::{keys, ConfigStore, StorageBackend},
    timezone,
    types::{ControllerStatus, OperationMode, Relay, RelayState, SensorReading},
};

/// Externally settable properties, named as they appear on the command
/// topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Mode,
    PoolMaxTemp,
    SolarMinTemp,
    Hysteresis,
    TimerStartHour,
    TimerStartMinute,
    TimerEndHour,
    TimerEndMinute,
    Timezone,
    PoolVolume,
    PumpCapacity,
    TemperatureDuration,
}

impl Property {
    pub const ALL: [Property; 12] = [
        Self::Mode,
        Self::PoolMaxTemp,
        Self::SolarMinTemp,
        Self::Hysteresis,
        Self::TimerStartHour,
        Self::TimerStartMinute,
        Self::TimerEndHour,
        Self::TimerEndMinute,
        Self::Timezone,
        Self::PoolVolume,
        Self::PumpCapacity,
        Self::TemperatureDuration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mode => "mode",
            Self::PoolMaxTemp => "pool-max-temp",
            Self::SolarMinTemp => "solar-min-temp",
            Self::Hysteresis => "hysteresis",
            Self::TimerStartHour => "timer-start-h",
            Self::TimerStartMinute => "timer-start-min",
            Self::TimerEndHour => "timer-end-h",
            Self::TimerEndMinute => "timer-end-min",
            Self::Timezone => "timezone",
            Self::PoolVolume => "pool-volume",
            Self::PumpCapacity => "pump-capacity",
            Self::TemperatureDuration => "temp-duration",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|property| property.as_str() == name.trim())
    }
}

fn parse_float(
    property: Property,
    value: &str,
    min: f32,
    max: f32,
) -> Result<f32, ValidationError> {
    let parsed = value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| ValidationError::InvalidValue {
            property: property.as_str(),
            value: value.to_string(),
        })?;

    if (min..=max).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ValidationError::OutOfRange {
            property: property.as_str(),
            value: parsed as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

fn parse_int(property: Property, value: &str, min: i64, max: i64) -> Result<i64, ValidationError> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::InvalidValue {
            property: property.as_str(),
            value: value.to_string(),
        })?;

    if (min..=max).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ValidationError::OutOfRange {
            property: property.as_str(),
            value: parsed as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

fn parse_bool(property: Property, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        _ => Err(ValidationError::InvalidValue {
            property: property.as_str(),
            value: value.to_string(),
        }),
    }
}

/// Owns the controller state and drives the active rule once per control
/// interval.
///
/// Single writer: the control loop calls [`ModeController::run_cycle`], and
/// external changes arrive through [`ModeController::apply_property`] and
/// friends on the same thread, so a change is persisted before the next
/// cycle starts.
pub struct ModeController<B, N> {
    state: PersistedState,
    store: ConfigStore<B>,
    clock: TimeSource<N>,
    rules: RuleSet,
    devices: Devices,
    interval_ms: u32,
    /// `None` until the first cycle and after every external change.
    last_run: Option<u32>,
    last_reading: SensorReading,
    last_window_active: bool,
}

impl<B: StorageBackend, N: NetworkTime> ModeController<B, N> {
    pub fn new(boot: &BootConfig, backend: B, network: N, devices: Devices) -> Self {
        let store = ConfigStore::new(backend);
        let mut state = store.load_state(&boot.initial_state());
        state.thresholds.sanitize();
        state.window.sanitize();

        let clock = TimeSource::new(network, state.timezone_index);
        info!(
            "controller ready: mode={} window={}-{} timezone={}",
            state.mode,
            state.window.format_start(),
            state.window.format_end(),
            clock.timezone_name()
        );

        Self {
            state,
            store,
            clock,
            rules: RuleSet::default(),
            devices,
            interval_ms: boot.control_interval_ms(),
            last_run: None,
            last_reading: SensorReading::invalid(),
            last_window_active: false,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.state.mode
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.state.thresholds
    }

    pub fn window(&self) -> &TimeWindow {
        &self.state.window
    }

    pub fn timezone_index(&self) -> usize {
        self.state.timezone_index
    }

    pub fn store(&self) -> &ConfigStore<B> {
        &self.store
    }

    pub fn relay_state(&self) -> RelayState {
        RelayState {
            pool_pump_on: self.devices.relay(Relay::PoolPump).is_on(),
            solar_pump_on: self.devices.relay(Relay::SolarPump).is_on(),
        }
    }

    fn force_next_cycle(&mut self) {
        self.last_run = None;
    }

    fn report_persistence(&mut self, err: &PersistenceError) {
        warn!("persisting settings failed: {err}");
        self.devices.observer.on_error(ErrorKind::Persistence);
    }

    pub fn set_mode(&mut self, candidate: &str) -> Result<(), InvalidModeRequest> {
        let mode = match OperationMode::parse(candidate) {
            Ok(mode) => mode,
            Err(err) => {
                warn!("{err}, keeping {}", self.state.mode);
                self.devices.observer.on_error(ErrorKind::InvalidMode);
                return Err(err);
            }
        };

        if mode != self.state.mode {
            info!("mode {} -> {mode}", self.state.mode);
        }
        self.state.mode = mode;
        if let Err(err) = self.store.save_string(keys::MODE, mode.as_str()) {
            self.report_persistence(&err);
        }
        self.devices.observer.on_mode_changed(mode);
        self.force_next_cycle();
        Ok(())
    }

    /// Samples probes and clock, refreshes the rule for the current mode and
    /// returns it.
    pub fn active_rule(&mut self, now_tick: u32) -> &ControlRule {
        let reading = SensorReading::new(
            self.devices.pool_sensor.read(),
            self.devices.solar_sensor.read(),
        );
        if !reading.is_valid() {
            warn!(
                "invalid temperature reading: pool={} solar={}",
                reading.pool_temp, reading.solar_temp
            );
            self.devices.observer.on_error(ErrorKind::InvalidReading);
        }

        let window_active = self.evaluate_window(now_tick, reading.pool_temp);
        self.last_reading = reading;
        self.last_window_active = window_active;

        let context = RuleContext {
            reading,
            thresholds: self.state.thresholds,
            window_active,
            relays: self.relay_state(),
        };
        self.rules.select(self.state.mode, context)
    }

    /// Whether the pump window is open right now. Fails closed when local
    /// time is not trustworthy or the derived duration cannot be computed.
    fn evaluate_window(&mut self, now_tick: u32, pool_temp: f32) -> bool {
        let now = self.clock.now(now_tick);
        if !now.valid {
            warn!("time not synchronised, treating timer window as closed");
            self.devices.observer.on_error(ErrorKind::TimeSyncStale);
            return false;
        }

        match schedule::resolve_window(&self.state.window, &self.state.thresholds, pool_temp) {
            Ok(window) => {
                let active = schedule::is_window_active(&window, now.naive());
                debug!(
                    "window {}-{} at {} {} active={active}",
                    window.format_start(),
                    window.format_end(),
                    now.local.format("%H:%M:%S"),
                    now.zone
                );
                active
            }
            Err(err) => {
                warn!("{err}, timer window disabled");
                self.devices.observer.on_error(ErrorKind::Configuration);
                false
            }
        }
    }

    /// Runs the active rule if a full control interval has passed since the
    /// last run, or if nothing has run yet. Returns whether it ran.
    pub fn run_cycle(&mut self, now_tick: u32) -> bool {
        if let Some(last_run) = self.last_run {
            if elapsed_ticks(last_run, now_tick) < self.interval_ms as u64 {
                return false;
            }
        }

        let command = self.active_rule(now_tick).evaluate();
        debug!("{} rule: {command:?}", self.state.mode);
        self.apply_command(command);
        self.last_run = Some(now_tick);
        true
    }

    fn apply_command(&mut self, command: RelayCommand) {
        if let Some(on) = command.pool_pump {
            self.switch(Relay::PoolPump, on);
        }
        if let Some(on) = command.solar_pump {
            self.switch(Relay::SolarPump, on);
        }
    }

    fn switch(&mut self, relay: Relay, on: bool) {
        let actuator = self.devices.relay_mut(relay);
        if actuator.is_on() == on {
            return;
        }
        actuator.set_on(on);
        info!("{} {}", relay.as_str(), if on { "on" } else { "off" });
        self.devices.observer.on_relay_changed(relay, on);
    }

    /// Validates and applies one externally supplied setting, persists it
    /// and forces the next cycle to run immediately.
    pub fn apply_property(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        let Some(property) = Property::parse(name) else {
            warn!("unknown property `{name}`");
            self.devices.observer.on_error(ErrorKind::InvalidProperty);
            return Err(ValidationError::UnknownProperty(name.to_string()));
        };

        match self.update_setting(property, value) {
            Ok(()) => {
                info!("{} set to {}", property.as_str(), value.trim());
                self.force_next_cycle();
                Ok(())
            }
            Err(ValidationError::Persistence(err)) => {
                // The new value is live even though it will not survive a reboot.
                self.report_persistence(&err);
                self.force_next_cycle();
                Err(ValidationError::Persistence(err))
            }
            // Already reported by set_mode.
            Err(err @ ValidationError::Mode(_)) => Err(err),
            Err(err) => {
                warn!("rejected {}: {err}", property.as_str());
                self.devices.observer.on_error(ErrorKind::InvalidProperty);
                Err(err)
            }
        }
    }

    fn update_setting(&mut self, property: Property, value: &str) -> Result<(), ValidationError> {
        let thresholds = &mut self.state.thresholds;
        let window = &mut self.state.window;
        match property {
            Property::Mode => self.set_mode(value)?,
            Property::PoolMaxTemp => {
                thresholds.pool_max_temp = parse_float(property, value, 0.0, 40.0)?;
                self.store.save_float(keys::POOL_MAX_TEMP, thresholds.pool_max_temp)?;
            }
            Property::SolarMinTemp => {
                thresholds.solar_min_temp = parse_float(property, value, 0.0, 100.0)?;
                self.store.save_float(keys::SOLAR_MIN_TEMP, thresholds.solar_min_temp)?;
            }
            Property::Hysteresis => {
                thresholds.hysteresis = parse_float(property, value, 0.0, 10.0)?;
                self.store.save_float(keys::HYSTERESIS, thresholds.hysteresis)?;
            }
            Property::PoolVolume => {
                thresholds.pool_volume = parse_float(property, value, 0.0, 10_000.0)?;
                self.store.save_float(keys::POOL_VOLUME, thresholds.pool_volume)?;
            }
            Property::PumpCapacity => {
                thresholds.pump_capacity = parse_float(property, value, 0.0, 1_000.0)?;
                self.store.save_float(keys::PUMP_CAPACITY, thresholds.pump_capacity)?;
            }
            Property::TemperatureDuration => {
                thresholds.use_duration_from_temperature = parse_bool(property, value)?;
                self.store.save_bool(
                    keys::USE_TEMP_DURATION,
                    thresholds.use_duration_from_temperature,
                )?;
            }
            Property::TimerStartHour => {
                let hour = parse_int(property, value, 0, 23)?;
                window.start_hour = hour as u8;
                self.store.save_int(keys::TIMER_START_H, hour as i32)?;
            }
            Property::TimerStartMinute => {
                let minute = parse_int(property, value, 0, 59)?;
                window.start_minute = minute as u8;
                self.store.save_int(keys::TIMER_START_M, minute as i32)?;
            }
            Property::TimerEndHour => {
                let hour = parse_int(property, value, 0, 23)?;
                window.end_hour = hour as u8;
                self.store.save_int(keys::TIMER_END_H, hour as i32)?;
            }
            Property::TimerEndMinute => {
                let minute = parse_int(property, value, 0, 59)?;
                window.end_minute = minute as u8;
                self.store.save_int(keys::TIMER_END_M, minute as i32)?;
            }
            Property::Timezone => {
                let max = timezone::PROFILES.len() as i64 - 1;
                let index = parse_int(property, value, 0, max)? as usize;
                self.clock.set_timezone(index);
                self.state.timezone_index = index;
                self.store.save_int(keys::TIMEZONE, index as i32)?;
            }
        }
        Ok(())
    }

    /// Current value of a property, formatted the way it is accepted.
    pub fn property_value(&self, property: Property) -> String {
        let t = &self.state.thresholds;
        let w = &self.state.window;
        match property {
            Property::Mode => self.state.mode.as_str().to_string(),
            Property::PoolMaxTemp => format!("{:.1}", t.pool_max_temp),
            Property::SolarMinTemp => format!("{:.1}", t.solar_min_temp),
            Property::Hysteresis => format!("{:.1}", t.hysteresis),
            Property::PoolVolume => format!("{:.1}", t.pool_volume),
            Property::PumpCapacity => format!("{:.1}", t.pump_capacity),
            Property::TemperatureDuration => t.use_duration_from_temperature.to_string(),
            Property::TimerStartHour => w.start_hour.to_string(),
            Property::TimerStartMinute => w.start_minute.to_string(),
            Property::TimerEndHour => w.end_hour.to_string(),
            Property::TimerEndMinute => w.end_minute.to_string(),
            Property::Timezone => self.state.timezone_index.to_string(),
        }
    }

    /// Drives a relay on explicit request. Only allowed where no rule owns
    /// that relay: both in manual mode, the pool pump in boost mode.
    pub fn command_relay(&mut self, relay: Relay, on: bool) -> Result<(), ValidationError> {
        let allowed = matches!(
            (self.state.mode, relay),
            (OperationMode::Manual, _) | (OperationMode::Boost, Relay::PoolPump)
        );
        if !allowed {
            warn!("{} is rule-driven in {} mode", relay.as_str(), self.state.mode);
            self.devices.observer.on_error(ErrorKind::InvalidProperty);
            return Err(ValidationError::RelayLocked {
                relay: relay.as_str(),
                mode: self.state.mode.as_str(),
            });
        }

        self.switch(relay, on);
        self.force_next_cycle();
        Ok(())
    }

    pub fn status(&self) -> ControllerStatus {
        let t = &self.state.thresholds;
        let relays = self.relay_state();
        ControllerStatus {
            mode: self.state.mode.as_str(),
            pool_temp: ControllerStatus::temperature(self.last_reading.pool_temp),
            solar_temp: ControllerStatus::temperature(self.last_reading.solar_temp),
            pool_max_temp: t.pool_max_temp,
            solar_min_temp: t.solar_min_temp,
            hysteresis: t.hysteresis,
            pool_volume: t.pool_volume,
            pump_capacity: t.pump_capacity,
            use_temperature_duration: t.use_duration_from_temperature,
            timer_start: self.state.window.format_start(),
            timer_end: self.state.window.format_end(),
            timezone_index: self.state.timezone_index,
            timezone: timezone::describe(self.state.timezone_index),
            pool_pump_on: relays.pool_pump_on,
            solar_pump_on: relays.solar_pump_on,
            time_synced: self.clock.is_sync_valid(),
            window_active: self.last_window_active,
        }
    }
}
