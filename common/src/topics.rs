pub const TOPIC_SENSOR_POOL_TEMP: &str = "pool/sensor/pool-temp";
pub const TOPIC_SENSOR_SOLAR_TEMP: &str = "pool/sensor/solar-temp";

/// Property commands arrive on `pool/cmnd/<property>`.
pub const TOPIC_CMD_PREFIX: &str = "pool/cmnd/";
pub const TOPIC_CMD_WILDCARD: &str = "pool/cmnd/+";

/// Retained state lives under `pool/state/<property|relay>`.
pub const TOPIC_STATE_PREFIX: &str = "pool/state/";
pub const TOPIC_STATE_STATUS: &str = "pool/state/status";
pub const TOPIC_STATE_ERROR: &str = "pool/state/error";

pub fn command_topic(name: &str) -> String {
    format!("{TOPIC_CMD_PREFIX}{name}")
}

pub fn state_topic(name: &str) -> String {
    format!("{TOPIC_STATE_PREFIX}{name}")
}
