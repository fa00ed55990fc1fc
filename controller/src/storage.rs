//! File-backed storage for the host runner.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::{info, warn};

use poolctl_common::{
    store::EEPROM_SIZE, EepromDevice, MemoryBackend, MemoryEeprom, PersistenceError, SlotBackend,
    StorageBackend, StorageSelection, StoredValue,
};

fn io_error(path: &Path, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Io(format!("{}: {err}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }
    std::fs::write(path, bytes).map_err(|err| io_error(path, err))
}

/// One JSON document per namespace, rewritten on every change.
pub struct FileBackend {
    path: PathBuf,
    inner: MemoryBackend,
}

impl FileBackend {
    pub fn open(data_dir: &Path, namespace: &str) -> anyhow::Result<Self> {
        let path = data_dir.join(format!("{namespace}.json"));
        let inner = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<MemoryBackend>(&raw) {
                Ok(stored) if stored.namespace() == namespace => stored,
                Ok(stored) => {
                    warn!(
                        "{} belongs to namespace {}, starting empty",
                        path.display(),
                        stored.namespace()
                    );
                    MemoryBackend::new(namespace)
                }
                Err(err) => {
                    warn!("ignoring unreadable {}: {err}", path.display());
                    MemoryBackend::new(namespace)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => MemoryBackend::new(namespace),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        Ok(Self { path, inner })
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        let payload =
            serde_json::to_vec_pretty(&self.inner).map_err(|err| io_error(&self.path, err))?;
        write_file(&self.path, &payload)
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<StoredValue>, PersistenceError> {
        self.inner.read(key)
    }

    fn write(&mut self, key: &str, value: StoredValue) -> Result<(), PersistenceError> {
        self.inner.write(key, value)?;
        self.flush()
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.inner.clear()?;
        self.flush()
    }
}

/// EEPROM image kept in a file of [`EEPROM_SIZE`] bytes.
pub struct FileEeprom {
    path: PathBuf,
    image: MemoryEeprom,
}

impl FileEeprom {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let image = match std::fs::read(&path) {
            Ok(raw) => {
                if raw.len() != EEPROM_SIZE {
                    warn!("{} holds {} bytes, resizing", path.display(), raw.len());
                }
                MemoryEeprom::from_bytes(raw)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => MemoryEeprom::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        Ok(Self { path, image })
    }
}

impl EepromDevice for FileEeprom {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), PersistenceError> {
        self.image.read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), PersistenceError> {
        self.image.write(offset, data)
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        write_file(&self.path, self.image.as_bytes())
    }
}

/// Storage chosen at boot.
pub enum HostBackend {
    Namespaced(FileBackend),
    Slots(SlotBackend<FileEeprom>),
}

impl HostBackend {
    pub fn open(selection: &StorageSelection, data_dir: &Path) -> anyhow::Result<Self> {
        match selection {
            StorageSelection::Namespaced { namespace } => {
                info!("storage: namespace {namespace} in {}", data_dir.display());
                Ok(Self::Namespaced(FileBackend::open(data_dir, namespace)?))
            }
            StorageSelection::Slots { layout } => {
                let path = data_dir.join("eeprom.bin");
                info!("storage: {layout:?} slots in {}", path.display());
                Ok(Self::Slots(SlotBackend::new(FileEeprom::open(path)?, *layout)))
            }
        }
    }
}

impl StorageBackend for HostBackend {
    fn read(&self, key: &str) -> Result<Option<StoredValue>, PersistenceError> {
        match self {
            Self::Namespaced(backend) => backend.read(key),
            Self::Slots(backend) => backend.read(key),
        }
    }

    fn write(&mut self, key: &str, value: StoredValue) -> Result<(), PersistenceError> {
        match self {
            Self::Namespaced(backend) => backend.write(key, value),
            Self::Slots(backend) => backend.write(key, value),
        }
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        match self {
            Self::Namespaced(backend) => backend.clear(),
            Self::Slots(backend) => backend.clear(),
        }
    }
}
