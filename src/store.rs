//! Persistence Module
//!
//! Whole-file JSON persistence for the scheduler's durable state. A store
//! holds exactly one value; reads parse the whole file and writes replace it.
//! There is no locking: the scheduler process is the only writer.

use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize value for {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A single persisted value.
///
/// `load` returns `Ok(None)` when nothing has been stored yet, so callers can
/// tell a fresh install apart from a corrupt file.
pub trait Store<T>: Send + Sync {
    fn load(&self) -> Result<Option<T>, StoreError>;
    fn save(&self, value: &T) -> Result<(), StoreError>;

    /// Human-readable location, used in log lines.
    fn location(&self) -> String;
}

/// Load the stored value, or build and persist a default one.
///
/// Missing files and unreadable files both self-heal to `init()`; neither is
/// fatal. A failure to persist the default is logged and otherwise ignored.
pub fn load_or_init<T, S, F>(store: &S, init: F) -> T
where
    S: Store<T> + ?Sized,
    F: FnOnce() -> T,
{
    match store.load() {
        Ok(Some(value)) => value,
        Ok(None) => {
            log::info!("No state found at {}, initializing defaults", store.location());
            persist_default(store, init())
        }
        Err(e) => {
            log::warn!("{}; reinitializing with defaults", e);
            persist_default(store, init())
        }
    }
}

fn persist_default<T, S>(store: &S, value: T) -> T
where
    S: Store<T> + ?Sized,
{
    if let Err(e) = store.save(&value) {
        log::error!("Failed to persist default state: {}", e);
    }
    value
}

/// JSON file on disk, pretty-printed so it stays hand-editable.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

impl<T> Store<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.display(),
                    source,
                })
            }
        };

        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.display(),
                source,
            })
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
            path: self.display(),
            source,
        })?;

        fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.display(),
            source,
        })
    }

    fn location(&self) -> String {
        self.display()
    }
}

/// In-process store for tests and dry runs.
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        // A poisoned lock still holds the last written value.
        let guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        let mut guard = self.value.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(value.clone());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
