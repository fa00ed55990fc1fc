use thiserror::Error;

/// Coarse error categories handed to [`crate::ports::StateObserver::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    InvalidReading,
    TimeSyncStale,
    InvalidMode,
    InvalidProperty,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::InvalidReading => "invalid-reading",
            Self::TimeSyncStale => "time-sync-stale",
            Self::InvalidMode => "invalid-mode",
            Self::InvalidProperty => "invalid-property",
            Self::Persistence => "persistence",
        }
    }
}

/// Temperature-derived duration was requested without a usable pool volume
/// or pump capacity.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("pool volume must be positive, got {0}")]
    PoolVolume(f32),
    #[error("pump capacity must be positive, got {0}")]
    PumpCapacity(f32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation mode `{candidate}`")]
pub struct InvalidModeRequest {
    pub candidate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(String),
    #[error("key `{0}` has no storage slot")]
    UnknownKey(String),
    #[error("value for `{key}` needs {len} bytes, slot holds {max}")]
    ValueTooLarge { key: String, len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown property `{0}`")]
    UnknownProperty(String),
    #[error("invalid value `{value}` for `{property}`")]
    InvalidValue {
        property: &'static str,
        value: String,
    },
    #[error("{property} must be within {min}..={max}, got {value}")]
    OutOfRange {
        property: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error(transparent)]
    Mode(#[from] InvalidModeRequest),
    #[error("{relay} cannot be switched manually in {mode} mode")]
    RelayLocked {
        relay: &'static str,
        mode: &'static str,
    },
    #[error("value applied but not persisted: {0}")]
    Persistence(#[from] PersistenceError),
}
