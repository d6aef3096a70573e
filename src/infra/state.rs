//! Persisted control state.
//!
//! Four small records live here: the cache configuration, the enabled
//! switch, the preload checkpoint, and the latest stats snapshot. Each is a
//! TOML document replaced wholesale on every save.
//!
//! The operator CLI and the scheduler are separate processes sharing one
//! state directory. Read-modify-write sequences therefore run under a
//! [`RecordLock`], which [`FileStateStore`] backs with an advisory lock file
//! per record.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;
use crate::cache::{CacheConfig, PreloadState, StatsSnapshot};

const SOURCE: &str = "infra::state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Record {
    Config,
    Switch,
    Preload,
    Stats,
}

impl Record {
    pub fn as_str(self) -> &'static str {
        match self {
            Record::Config => "config",
            Record::Switch => "switch",
            Record::Preload => "preload",
            Record::Stats => "stats",
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state record `{record}` could not be accessed at `{path}`: {source}")]
    Io {
        record: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state record `{record}` is malformed: {message}")]
    Malformed {
        record: &'static str,
        message: String,
    },
    #[error("state record `{record}` could not be encoded: {message}")]
    Encode {
        record: &'static str,
        message: String,
    },
}

impl StateError {
    fn io(record: Record, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            record: record.as_str(),
            path: path.into(),
            source,
        }
    }
}

/// Exclusive hold on a record, released on drop.
///
/// Advisory file locks do not exclude threads of the holding process on
/// every platform, so the guard also holds the backend's in-process mutex.
#[derive(Debug)]
pub struct RecordLock<'a> {
    _local: MutexGuard<'a, ()>,
    file: Option<File>,
}

impl<'a> RecordLock<'a> {
    /// A lock that only excludes callers within this process.
    pub fn local(guard: MutexGuard<'a, ()>) -> Self {
        Self {
            _local: guard,
            file: None,
        }
    }
}

impl Drop for RecordLock<'_> {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(err) = FileExt::unlock(file) {
                warn!(error = %err, "State record lock could not be released");
            }
        }
    }
}

/// Raw record persistence. Implementations must replace a record
/// atomically: a reader sees either the previous or the new document.
pub trait StateBackend: Send + Sync {
    fn read(&self, record: Record) -> Result<Option<String>, StateError>;
    fn write(&self, record: Record, contents: &str) -> Result<(), StateError>;

    /// Blocks until no other holder of `record` remains, in this process or
    /// any other sharing the backend, and excludes them until the returned
    /// guard is dropped.
    fn lock(&self, record: Record) -> Result<RecordLock<'_>, StateError>;
}

/// One TOML file per record inside a directory.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    local: Mutex<()>,
}

impl FileStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| StateError::io(Record::Config, &dir, err))?;
        Ok(Self {
            dir,
            local: Mutex::new(()),
        })
    }

    fn path(&self, record: Record) -> PathBuf {
        self.dir.join(format!("{}.toml", record.as_str()))
    }

    fn lock_path(&self, record: Record) -> PathBuf {
        self.dir.join(format!("{}.lock", record.as_str()))
    }
}

impl StateBackend for FileStateStore {
    fn read(&self, record: Record) -> Result<Option<String>, StateError> {
        let path = self.path(record);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateError::io(record, path, err)),
        }
    }

    fn write(&self, record: Record, contents: &str) -> Result<(), StateError> {
        let path = self.path(record);
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|err| StateError::io(record, &self.dir, err))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| StateError::io(record, tmp.path(), err))?;
        tmp.persist(&path)
            .map_err(|err| StateError::io(record, &path, err.error))?;
        debug!(record = record.as_str(), path = %path.display(), "State record written");
        Ok(())
    }

    fn lock(&self, record: Record) -> Result<RecordLock<'_>, StateError> {
        let guard = mutex_lock(&self.local, SOURCE, "lock");
        let path = self.lock_path(record);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| StateError::io(record, &path, err))?;
        FileExt::lock_exclusive(&file)
            .map_err(|err| StateError::io(record, &path, err))?;
        Ok(RecordLock {
            _local: guard,
            file: Some(file),
        })
    }
}

/// In-process backend for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<Record, String>>,
    local: Mutex<()>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStateStore {
    fn read(&self, record: Record) -> Result<Option<String>, StateError> {
        let records = mutex_lock(&self.records, SOURCE, "read");
        Ok(records.get(&record).cloned())
    }

    fn write(&self, record: Record, contents: &str) -> Result<(), StateError> {
        let mut records = mutex_lock(&self.records, SOURCE, "write");
        records.insert(record, contents.to_string());
        Ok(())
    }

    fn lock(&self, _record: Record) -> Result<RecordLock<'_>, StateError> {
        Ok(RecordLock::local(mutex_lock(&self.local, SOURCE, "lock")))
    }
}

/// The administrative on/off switch of the whole cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    pub enabled: bool,
}

/// Typed access to the records of a [`StateBackend`].
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn load_config(&self) -> Result<Option<CacheConfig>, StateError> {
        Ok(self.load(Record::Config)?.map(CacheConfig::bounded))
    }

    pub fn save_config(&self, config: &CacheConfig) -> Result<(), StateError> {
        self.save(Record::Config, config)
    }

    /// Replaces the configuration with `apply(current)` under the record
    /// lock, where `current` is the persisted record or `fallback`. Returns
    /// the previous and the saved configuration.
    pub fn update_config(
        &self,
        fallback: impl FnOnce() -> CacheConfig,
        apply: impl FnOnce(&CacheConfig) -> CacheConfig,
    ) -> Result<(CacheConfig, CacheConfig), StateError> {
        let _lock = self.backend.lock(Record::Config)?;
        let current = self.load_config()?.unwrap_or_else(fallback);
        let next = apply(&current);
        self.save_config(&next)?;
        Ok((current, next))
    }

    /// A missing switch record reads as disabled.
    pub fn load_switch(&self) -> Result<SwitchState, StateError> {
        Ok(self.load(Record::Switch)?.unwrap_or_default())
    }

    pub fn save_switch(&self, switch: &SwitchState) -> Result<(), StateError> {
        self.save(Record::Switch, switch)
    }

    pub fn load_preload(&self) -> Result<PreloadState, StateError> {
        Ok(self.load(Record::Preload)?.unwrap_or_default())
    }

    /// Applies `apply` to the preload checkpoint as one atomic step across
    /// processes. The record is written back only if it changed, and not at
    /// all when `apply` fails.
    pub fn update_preload<R, E>(
        &self,
        apply: impl FnOnce(&mut PreloadState) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StateError>,
    {
        let _lock = self.backend.lock(Record::Preload)?;
        let mut state = self.load_preload()?;
        let before = state.clone();
        let result = apply(&mut state)?;
        if state != before {
            self.save_preload(&state)?;
        }
        Ok(result)
    }

    pub fn save_preload(&self, state: &PreloadState) -> Result<(), StateError> {
        self.save(Record::Preload, state)
    }

    pub fn load_stats(&self) -> Result<Option<StatsSnapshot>, StateError> {
        self.load(Record::Stats)
    }

    pub fn save_stats(&self, snapshot: &StatsSnapshot) -> Result<(), StateError> {
        self.save(Record::Stats, snapshot)
    }

    fn load<T: DeserializeOwned>(&self, record: Record) -> Result<Option<T>, StateError> {
        let Some(contents) = self.backend.read(record)? else {
            return Ok(None);
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|err| StateError::Malformed {
                record: record.as_str(),
                message: err.to_string(),
            })
    }

    fn save<T: Serialize>(&self, record: Record, value: &T) -> Result<(), StateError> {
        let contents = toml::to_string(value).map_err(|err| StateError::Encode {
            record: record.as_str(),
            message: err.to_string(),
        })?;
        self.backend.write(record, &contents)
    }
}
