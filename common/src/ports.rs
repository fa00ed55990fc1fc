//! Collaborator traits: everything the decision engine consumes or drives
//! lives behind one of these, so the engine never touches buses, pins or
//! sockets itself.

use crate::{
    error::ErrorKind,
    types::{OperationMode, Relay},
};

/// Source of UTC epoch seconds, typically an NTP client.
pub trait NetworkTime {
    /// Returns `None` when the fetch failed. Callers validate plausibility.
    fn fetch_epoch(&mut self) -> Option<i64>;
}

pub trait TemperatureProvider {
    /// Latest temperature in °C, NaN when the probe could not be read.
    fn read(&mut self) -> f32;
}

pub trait RelayActuator {
    fn set_on(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

/// Receives state changes for the reporting layer.
pub trait StateObserver {
    fn on_mode_changed(&mut self, mode: OperationMode);
    fn on_relay_changed(&mut self, relay: Relay, on: bool);
    fn on_error(&mut self, kind: ErrorKind);
}

/// The physical side of the controller: two probes and two relays.
pub struct Devices {
    pub pool_sensor: Box<dyn TemperatureProvider + Send>,
    pub solar_sensor: Box<dyn TemperatureProvider + Send>,
    pub pool_pump: Box<dyn RelayActuator + Send>,
    pub solar_pump: Box<dyn RelayActuator + Send>,
    pub observer: Box<dyn StateObserver + Send>,
}

impl Devices {
    pub fn relay(&self, relay: Relay) -> &(dyn RelayActuator + Send) {
        match relay {
            Relay::PoolPump => self.pool_pump.as_ref(),
            Relay::SolarPump => self.solar_pump.as_ref(),
        }
    }

    pub fn relay_mut(&mut self, relay: Relay) -> &mut (dyn RelayActuator + Send) {
        match relay {
            Relay::PoolPump => self.pool_pump.as_mut(),
            Relay::SolarPump => self.solar_pump.as_mut(),
        }
    }
}
