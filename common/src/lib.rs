pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod ports;
pub mod rules;
pub mod schedule;
pub mod store;
pub mod timezone;
pub mod topics;
pub mod types;

pub use clock::{LocalTime, TimeSource};
pub use config::{BootConfig, MqttSettings, PersistedState, SlotLayout, StorageSelection, ThresholdConfig, TimeWindow};
pub use controller::{ModeController, Property};
pub use error::{ConfigurationError, ErrorKind, InvalidModeRequest, PersistenceError, ValidationError};
pub use ports::{Devices, NetworkTime, RelayActuator, StateObserver, TemperatureProvider};
pub use rules::{ControlRule, RelayCommand, RuleContext, RuleSet};
pub use store::{ConfigStore, EepromDevice, MemoryBackend, MemoryEeprom, SlotBackend, StorageBackend, StoredValue};
pub use topics::*;
pub use types::{ControllerStatus, OperationMode, Relay, RelayState, SensorReading};
