//! Persisted settings.
//!
//! [`ConfigStore`] is the typed front end. It never hands back a value it
//! cannot vouch for: anything missing, mistyped, NaN or outside the key's sane
//! range is replaced by the caller's default. Bytes live in a
//! [`StorageBackend`]; two are provided:
//!
//! - [`MemoryBackend`], a namespaced key/value map. Hosts persist it as a
//!   file, flash targets map it onto their NVS partition.
//! - [`SlotBackend`], 16 fixed-size slots in a 512-byte EEPROM image for
//!   targets without a key/value engine. See [`SlotLayout`] for how keys are
//!   mapped onto slots.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::{PersistedState, SlotLayout, ThresholdConfig, TimeWindow},
    error::PersistenceError,
    timezone,
    types::OperationMode,
};

pub const DEFAULT_NAMESPACE: &str = "pool-controller";

/// Stable key names. Devices in the field already hold these, so they must
/// never be renamed.
pub mod keys {
    pub const MODE: &str = "opmode";
    pub const POOL_MAX_TEMP: &str = "poolMaxTemp";
    pub const SOLAR_MIN_TEMP: &str = "solarMinTemp";
    pub const HYSTERESIS: &str = "hysteresis";
    pub const TIMER_START_H: &str = "timerStartH";
    pub const TIMER_START_M: &str = "timerStartM";
    pub const TIMER_END_H: &str = "timerEndH";
    pub const TIMER_END_M: &str = "timerEndM";
    pub const TIMEZONE: &str = "timezone";
    pub const POOL_VOLUME: &str = "poolVolume";
    pub const PUMP_CAPACITY: &str = "pumpCapacity";
    pub const USE_TEMP_DURATION: &str = "useTempDuration";

    /// Slot order for [`crate::config::SlotLayout::Fixed`]. Append only.
    pub const ALL: [&str; 12] = [
        MODE,
        POOL_MAX_TEMP,
        SOLAR_MIN_TEMP,
        HYSTERESIS,
        TIMER_START_H,
        TIMER_START_M,
        TIMER_END_H,
        TIMER_END_M,
        TIMEZONE,
        POOL_VOLUME,
        PUMP_CAPACITY,
        USE_TEMP_DURATION,
    ];
}

fn float_range(key: &str) -> Option<RangeInclusive<f32>> {
    match key {
        keys::POOL_MAX_TEMP => Some(0.0..=40.0),
        keys::SOLAR_MIN_TEMP => Some(0.0..=100.0),
        keys::HYSTERESIS => Some(0.0..=10.0),
        keys::POOL_VOLUME => Some(0.0..=10_000.0),
        keys::PUMP_CAPACITY => Some(0.0..=1_000.0),
        _ => None,
    }
}

fn int_range(key: &str) -> Option<RangeInclusive<i32>> {
    match key {
        keys::TIMER_START_H | keys::TIMER_END_H => Some(0..=23),
        keys::TIMER_START_M | keys::TIMER_END_M => Some(0..=59),
        keys::TIMEZONE => Some(0..=timezone::PROFILES.len() as i32 - 1),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredValue {
    Str(String),
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl StoredValue {
    fn tag(&self) -> u8 {
        match self {
            Self::Str(_) => 1,
            Self::Float(_) => 2,
            Self::Int(_) => 3,
            Self::Bool(_) => 4,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Str(value) => value.as_bytes().to_vec(),
            Self::Float(value) => value.to_le_bytes().to_vec(),
            Self::Int(value) => value.to_le_bytes().to_vec(),
            Self::Bool(value) => vec![u8::from(*value)],
        }
    }

    fn decode(tag: u8, payload: &[u8]) -> Option<Self> {
        match tag {
            1 => std::str::from_utf8(payload)
                .ok()
                .map(|value| Self::Str(value.to_string())),
            2 => Some(Self::Float(f32::from_le_bytes(payload.try_into().ok()?))),
            3 => Some(Self::Int(i32::from_le_bytes(payload.try_into().ok()?))),
            4 => match payload {
                [0] => Some(Self::Bool(false)),
                [1] => Some(Self::Bool(true)),
                _ => None,
            },
            _ => None,
        }
    }
}

pub trait StorageBackend {
    /// `Ok(None)` when the key was never written or its bytes are unreadable.
    fn read(&self, key: &str) -> Result<Option<StoredValue>, PersistenceError>;
    fn write(&mut self, key: &str, value: StoredValue) -> Result<(), PersistenceError>;
    fn clear(&mut self) -> Result<(), PersistenceError>;
}

/// Key/value entries scoped to one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryBackend {
    namespace: String,
    entries: BTreeMap<String, StoredValue>,
}

impl MemoryBackend {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entries(&self) -> &BTreeMap<String, StoredValue> {
        &self.entries
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<StoredValue>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: StoredValue) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.entries.clear();
        Ok(())
    }
}

pub const EEPROM_SIZE: usize = 512;
pub const SLOT_COUNT: usize = 16;
pub const SLOT_SIZE: usize = EEPROM_SIZE / SLOT_COUNT;

const SLOT_MAGIC: u8 = 0xA5;
// magic, tag, fingerprint (2), length, checksum
const SLOT_OVERHEAD: usize = 6;
pub const MAX_SLOT_PAYLOAD: usize = SLOT_SIZE - SLOT_OVERHEAD;

/// Byte-addressable non-volatile memory.
pub trait EepromDevice {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), PersistenceError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), PersistenceError>;
    /// Flushes buffered writes to the medium.
    fn commit(&mut self) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEeprom {
    bytes: Vec<u8>,
}

impl Default for MemoryEeprom {
    fn default() -> Self {
        // Erased EEPROM cells read as 0xFF.
        Self {
            bytes: vec![0xFF; EEPROM_SIZE],
        }
    }
}

impl MemoryEeprom {
    /// Wraps an existing image, padding or truncating it to [`EEPROM_SIZE`].
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        bytes.resize(EEPROM_SIZE, 0xFF);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl EepromDevice for MemoryEeprom {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), PersistenceError> {
        let src = self
            .bytes
            .get(offset..offset + buf.len())
            .ok_or_else(|| PersistenceError::Io(format!("read past end at {offset}")))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), PersistenceError> {
        let dst = self
            .bytes
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| PersistenceError::Io(format!("write past end at {offset}")))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Slot index used by [`SlotLayout::Hashed`] (djb2 over the key bytes).
pub fn hashed_slot(key: &str) -> usize {
    let hash = key
        .bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(byte as u32));
    hash as usize % SLOT_COUNT
}

/// 16-bit FNV-1a fold stored next to each value, so a slot that now belongs
/// to another key reads as empty instead of as a foreign value.
fn fingerprint(key: &str) -> u16 {
    let hash = key.bytes().fold(0x811c_9dc5u32, |hash, byte| {
        (hash ^ byte as u32).wrapping_mul(0x0100_0193)
    });
    ((hash >> 16) ^ (hash & 0xFFFF)) as u16
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Fixed-size slot storage on a small EEPROM.
///
/// With [`SlotLayout::Hashed`] two keys hashing to the same slot overwrite
/// each other: `solarMinTemp`/`timezone` and `timerEndH`/`pumpCapacity` do.
/// The fingerprint turns the loser into a missing key, so it falls back to its
/// default on the next boot, but the stored value is gone. Use
/// [`SlotLayout::Fixed`] unless the image was written by older firmware.
pub struct SlotBackend<D> {
    device: D,
    layout: SlotLayout,
}

impl<D: EepromDevice> SlotBackend<D> {
    pub fn new(device: D, layout: SlotLayout) -> Self {
        Self { device, layout }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn slot_for(&self, key: &str) -> Result<usize, PersistenceError> {
        match self.layout {
            SlotLayout::Fixed => keys::ALL
                .iter()
                .position(|known| *known == key)
                .ok_or_else(|| PersistenceError::UnknownKey(key.to_string())),
            SlotLayout::Hashed => Ok(hashed_slot(key)),
        }
    }

    fn decode_slot(key: &str, raw: &[u8; SLOT_SIZE]) -> Option<StoredValue> {
        if raw[0] != SLOT_MAGIC {
            return None;
        }
        if u16::from_le_bytes([raw[2], raw[3]]) != fingerprint(key) {
            debug!("slot holds another key than `{key}`");
            return None;
        }
        let len = raw[4] as usize;
        if len > MAX_SLOT_PAYLOAD {
            return None;
        }
        let body_end = 5 + len;
        if checksum(&raw[..body_end]) != raw[body_end] {
            warn!("checksum mismatch in slot for `{key}`");
            return None;
        }
        StoredValue::decode(raw[1], &raw[5..body_end])
    }
}

impl<D: EepromDevice> StorageBackend for SlotBackend<D> {
    fn read(&self, key: &str) -> Result<Option<StoredValue>, PersistenceError> {
        let slot = self.slot_for(key)?;
        let mut raw = [0u8; SLOT_SIZE];
        self.device.read(slot * SLOT_SIZE, &mut raw)?;
        Ok(Self::decode_slot(key, &raw))
    }

    fn write(&mut self, key: &str, value: StoredValue) -> Result<(), PersistenceError> {
        let slot = self.slot_for(key)?;
        let payload = value.payload();
        if payload.len() > MAX_SLOT_PAYLOAD {
            return Err(PersistenceError::ValueTooLarge {
                key: key.to_string(),
                len: payload.len(),
                max: MAX_SLOT_PAYLOAD,
            });
        }

        let mut raw = [0u8; SLOT_SIZE];
        raw[0] = SLOT_MAGIC;
        raw[1] = value.tag();
        raw[2..4].copy_from_slice(&fingerprint(key).to_le_bytes());
        raw[4] = payload.len() as u8;
        let body_end = 5 + payload.len();
        raw[5..body_end].copy_from_slice(&payload);
        raw[body_end] = checksum(&raw[..body_end]);

        self.device.write(slot * SLOT_SIZE, &raw)?;
        self.device.commit()
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.device.write(0, &[0u8; EEPROM_SIZE])?;
        self.device.commit()
    }
}

pub struct ConfigStore<B> {
    backend: B,
}

impl<B: StorageBackend> ConfigStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lookup(&self, key: &str) -> Option<StoredValue> {
        match self.backend.read(key) {
            Ok(value) => value,
            Err(err) => {
                warn!("reading `{key}` failed: {err}");
                None
            }
        }
    }

    pub fn load_string(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(StoredValue::Str(value)) => value,
            None => default.to_string(),
            Some(other) => {
                warn!("`{key}` holds {other:?}, expected a string; using default");
                default.to_string()
            }
        }
    }

    pub fn load_float(&self, key: &str, default: f32) -> f32 {
        let value = match self.lookup(key) {
            Some(StoredValue::Float(value)) => value,
            None => return default,
            Some(other) => {
                warn!("`{key}` holds {other:?}, expected a float; using default");
                return default;
            }
        };

        let in_range = float_range(key).map_or(true, |range| range.contains(&value));
        if value.is_finite() && in_range {
            value
        } else {
            warn!("discarding implausible `{key}` = {value}, using {default}");
            default
        }
    }

    pub fn load_int(&self, key: &str, default: i32) -> i32 {
        let value = match self.lookup(key) {
            Some(StoredValue::Int(value)) => value,
            None => return default,
            Some(other) => {
                warn!("`{key}` holds {other:?}, expected an int; using default");
                return default;
            }
        };

        if int_range(key).map_or(true, |range| range.contains(&value)) {
            value
        } else {
            warn!("discarding implausible `{key}` = {value}, using {default}");
            default
        }
    }

    pub fn load_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(StoredValue::Bool(value)) => value,
            None => default,
            Some(other) => {
                warn!("`{key}` holds {other:?}, expected a bool; using default");
                default
            }
        }
    }

    pub fn save_string(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        debug!("persist {key} = {value:?}");
        self.backend.write(key, StoredValue::Str(value.to_string()))
    }

    pub fn save_float(&mut self, key: &str, value: f32) -> Result<(), PersistenceError> {
        debug!("persist {key} = {value}");
        self.backend.write(key, StoredValue::Float(value))
    }

    pub fn save_int(&mut self, key: &str, value: i32) -> Result<(), PersistenceError> {
        debug!("persist {key} = {value}");
        self.backend.write(key, StoredValue::Int(value))
    }

    pub fn save_bool(&mut self, key: &str, value: bool) -> Result<(), PersistenceError> {
        debug!("persist {key} = {value}");
        self.backend.write(key, StoredValue::Bool(value))
    }

    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.backend.clear()
    }

    /// Reads every persisted key, taking missing or implausible entries from
    /// `defaults`.
    pub fn load_state(&self, defaults: &PersistedState) -> PersistedState {
        let stored_mode = self.load_string(keys::MODE, defaults.mode.as_str());
        let mode = OperationMode::parse(&stored_mode).unwrap_or_else(|err| {
            warn!("{err} in storage, using {}", defaults.mode);
            defaults.mode
        });

        let d = &defaults.thresholds;
        let thresholds = ThresholdConfig {
            pool_max_temp: self.load_float(keys::POOL_MAX_TEMP, d.pool_max_temp),
            solar_min_temp: self.load_float(keys::SOLAR_MIN_TEMP, d.solar_min_temp),
            hysteresis: self.load_float(keys::HYSTERESIS, d.hysteresis),
            pool_volume: self.load_float(keys::POOL_VOLUME, d.pool_volume),
            pump_capacity: self.load_float(keys::PUMP_CAPACITY, d.pump_capacity),
            use_duration_from_temperature: self
                .load_bool(keys::USE_TEMP_DURATION, d.use_duration_from_temperature),
        };

        // Int ranges above keep every field within u8.
        let w = &defaults.window;
        let window = TimeWindow {
            start_hour: self.load_int(keys::TIMER_START_H, w.start_hour as i32) as u8,
            start_minute: self.load_int(keys::TIMER_START_M, w.start_minute as i32) as u8,
            end_hour: self.load_int(keys::TIMER_END_H, w.end_hour as i32) as u8,
            end_minute: self.load_int(keys::TIMER_END_M, w.end_minute as i32) as u8,
        };

        let timezone_index =
            self.load_int(keys::TIMEZONE, defaults.timezone_index as i32) as usize;

        PersistedState {
            mode,
            thresholds,
            window,
            timezone_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn save_state<B: StorageBackend>(store: &mut ConfigStore<B>, state: &PersistedState) {
        let t = &state.thresholds;
        let w = &state.window;
        store.save_string(keys::MODE, state.mode.as_str()).unwrap();
        store.save_float(keys::POOL_MAX_TEMP, t.pool_max_temp).unwrap();
        store.save_float(keys::SOLAR_MIN_TEMP, t.solar_min_temp).unwrap();
        store.save_float(keys::HYSTERESIS, t.hysteresis).unwrap();
        store.save_float(keys::POOL_VOLUME, t.pool_volume).unwrap();
        store.save_float(keys::PUMP_CAPACITY, t.pump_capacity).unwrap();
        store
            .save_bool(keys::USE_TEMP_DURATION, t.use_duration_from_temperature)
            .unwrap();
        store.save_int(keys::TIMER_START_H, w.start_hour as i32).unwrap();
        store.save_int(keys::TIMER_START_M, w.start_minute as i32).unwrap();
        store.save_int(keys::TIMER_END_H, w.end_hour as i32).unwrap();
        store.save_int(keys::TIMER_END_M, w.end_minute as i32).unwrap();
        store.save_int(keys::TIMEZONE, state.timezone_index as i32).unwrap();
    }

    fn slot_store(layout: SlotLayout) -> ConfigStore<SlotBackend<MemoryEeprom>> {
        ConfigStore::new(SlotBackend::new(MemoryEeprom::default(), layout))
    }

    #[test]
    fn float_round_trip() {
        let mut store = ConfigStore::new(MemoryBackend::new(DEFAULT_NAMESPACE));
        store.save_float(keys::POOL_MAX_TEMP, 31.5).unwrap();
        assert_eq!(store.load_float(keys::POOL_MAX_TEMP, 28.5), 31.5);
    }

    #[test]
    fn unset_key_returns_default() {
        let store = ConfigStore::new(MemoryBackend::new(DEFAULT_NAMESPACE));
        assert_eq!(store.load_float(keys::HYSTERESIS, 1.0), 1.0);
        assert_eq!(store.load_int(keys::TIMER_START_H, 10), 10);
        assert_eq!(store.load_string(keys::MODE, "auto"), "auto");
        assert!(!store.load_bool(keys::USE_TEMP_DURATION, false));

        let slots = slot_store(SlotLayout::Fixed);
        assert_eq!(slots.load_float(keys::SOLAR_MIN_TEMP, 55.0), 55.0);
    }

    #[test]
    fn implausible_values_fall_back_to_default() {
        let mut store = ConfigStore::new(MemoryBackend::new(DEFAULT_NAMESPACE));
        store.save_float(keys::POOL_MAX_TEMP, f32::NAN).unwrap();
        store.save_float(keys::HYSTERESIS, -3.0).unwrap();
        store.save_int(keys::TIMER_END_M, 75).unwrap();
        store.save_int(keys::TIMEZONE, 12).unwrap();
        store.save_string(keys::SOLAR_MIN_TEMP, "hot").unwrap();

        assert_eq!(store.load_float(keys::POOL_MAX_TEMP, 28.5), 28.5);
        assert_eq!(store.load_float(keys::HYSTERESIS, 1.0), 1.0);
        assert_eq!(store.load_int(keys::TIMER_END_M, 30), 30);
        assert_eq!(store.load_int(keys::TIMEZONE, 0), 0);
        assert_eq!(store.load_float(keys::SOLAR_MIN_TEMP, 55.0), 55.0);
    }

    #[test]
    fn state_round_trip_through_slots() {
        for layout in [SlotLayout::Fixed, SlotLayout::Hashed] {
            let mut store = slot_store(layout);
            let state = PersistedState {
                mode: OperationMode::Boost,
                thresholds: ThresholdConfig {
                    pool_max_temp: 30.0,
                    ..ThresholdConfig::default()
                },
                window: TimeWindow::new(9, 15, 18, 45),
                timezone_index: 0,
            };
            save_state(&mut store, &state);
            let loaded = store.load_state(&PersistedState::default());
            assert_eq!(loaded.mode, OperationMode::Boost);
            assert_eq!(loaded.thresholds.pool_max_temp, 30.0);
            assert_eq!(loaded.window.start_hour, 9);
            assert_eq!(loaded.window.start_minute, 15);
            assert_eq!(loaded.window.end_minute, 45);
        }
    }

    #[test]
    fn fixed_layout_keeps_every_key() {
        let mut store = slot_store(SlotLayout::Fixed);
        let state = PersistedState {
            mode: OperationMode::Manual,
            thresholds: ThresholdConfig {
                solar_min_temp: 60.0,
                pump_capacity: 6.0,
                ..ThresholdConfig::default()
            },
            window: TimeWindow::new(8, 0, 20, 0),
            timezone_index: 3,
        };
        save_state(&mut store, &state);
        assert_eq!(store.load_state(&PersistedState::default()), state);
    }

    #[test]
    fn fixed_layout_rejects_unknown_keys() {
        let mut store = slot_store(SlotLayout::Fixed);
        assert_eq!(
            store.save_int("bogus", 1),
            Err(PersistenceError::UnknownKey("bogus".to_string()))
        );
        assert_eq!(store.load_int("bogus", 7), 7);
    }

    #[test]
    fn hashed_layout_collision_loses_the_older_key() {
        let mut store = slot_store(SlotLayout::Hashed);
        assert_eq!(hashed_slot(keys::SOLAR_MIN_TEMP), hashed_slot(keys::TIMEZONE));

        store.save_float(keys::SOLAR_MIN_TEMP, 60.0).unwrap();
        store.save_int(keys::TIMEZONE, 3).unwrap();

        assert_eq!(store.load_int(keys::TIMEZONE, 0), 3);
        assert_eq!(store.load_float(keys::SOLAR_MIN_TEMP, 55.0), 55.0);
    }

    #[test]
    fn corrupted_slot_reads_as_missing() {
        let mut store = slot_store(SlotLayout::Fixed);
        store.save_float(keys::POOL_MAX_TEMP, 31.0).unwrap();

        let slot = 1;
        let mut image = store.backend().device().as_bytes().to_vec();
        image[slot * SLOT_SIZE + 6] ^= 0x40;
        let store = ConfigStore::new(SlotBackend::new(
            MemoryEeprom::from_bytes(image),
            SlotLayout::Fixed,
        ));

        assert_eq!(store.load_float(keys::POOL_MAX_TEMP, 28.5), 28.5);
    }

    #[test]
    fn oversized_string_is_rejected() {
        let mut store = slot_store(SlotLayout::Fixed);
        let long = "x".repeat(MAX_SLOT_PAYLOAD + 1);
        assert!(matches!(
            store.save_string(keys::MODE, &long),
            Err(PersistenceError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn clear_wipes_everything() {
        let mut store = slot_store(SlotLayout::Fixed);
        store.save_string(keys::MODE, "boost").unwrap();
        store.clear().unwrap();
        assert_eq!(store.load_string(keys::MODE, "auto"), "auto");

        let mut store = ConfigStore::new(MemoryBackend::new("test"));
        store.save_bool(keys::USE_TEMP_DURATION, true).unwrap();
        store.clear().unwrap();
        assert!(store.backend().entries().is_empty());
    }
}
