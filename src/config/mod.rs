//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, FlushArgs, GlobalOverrides, PreloadArgs, RunArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "supercache";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_PRELOAD_TICK_SECS: u64 = 60;
const DEFAULT_GC_BATCH_SIZE: u64 = 100;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub content: ContentSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    /// Content manifest; without one the catalog is empty and no permalink
    /// resolves.
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub preload_tick: Duration,
    pub gc_batch_size: NonZeroUsize,
    /// Refresh the stats snapshot after every collection pass.
    pub stats_every_gc_pass: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SUPERCACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Command::Run(args) = &cli.command {
        raw.apply_run_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    content: RawContentSettings,
    scheduler: RawSchedulerSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.storage.cache_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.state_dir.as_ref() {
            self.storage.state_dir = Some(dir.clone());
        }
        if let Some(manifest) = overrides.manifest.as_ref() {
            self.content.manifest = Some(manifest.clone());
        }
    }

    fn apply_run_overrides(&mut self, overrides: &RunArgs) {
        if let Some(seconds) = overrides.preload_tick_seconds {
            self.scheduler.preload_tick_seconds = Some(seconds);
        }
        if let Some(size) = overrides.gc_batch_size {
            self.scheduler.gc_batch_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            storage,
            content,
            scheduler,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            content: build_content_settings(content),
            scheduler: build_scheduler_settings(scheduler)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let cache_dir = non_empty_path(storage.cache_dir, DEFAULT_CACHE_DIR, "storage.cache_dir")?;
    let state_dir = non_empty_path(storage.state_dir, DEFAULT_STATE_DIR, "storage.state_dir")?;
    if cache_dir == state_dir {
        return Err(LoadError::invalid(
            "storage.state_dir",
            "must differ from storage.cache_dir",
        ));
    }

    Ok(StorageSettings {
        cache_dir,
        state_dir,
    })
}

fn build_content_settings(content: RawContentSettings) -> ContentSettings {
    let manifest = content
        .manifest
        .filter(|path| !path.as_os_str().is_empty());
    ContentSettings { manifest }
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let tick_seconds = scheduler
        .preload_tick_seconds
        .unwrap_or(DEFAULT_PRELOAD_TICK_SECS);
    if tick_seconds == 0 {
        return Err(LoadError::invalid(
            "scheduler.preload_tick_seconds",
            "must be greater than zero",
        ));
    }

    let batch_value = scheduler.gc_batch_size.unwrap_or(DEFAULT_GC_BATCH_SIZE);
    let gc_batch_size = non_zero_usize(batch_value, "scheduler.gc_batch_size")?;

    Ok(SchedulerSettings {
        preload_tick: Duration::from_secs(tick_seconds),
        gc_batch_size,
        stats_every_gc_pass: scheduler.stats_every_gc_pass.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    cache_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    preload_tick_seconds: Option<u64>,
    gc_batch_size: Option<u64>,
    stats_every_gc_pass: Option<bool>,
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    match value {
        Some(path) if path.as_os_str().is_empty() => {
            Err(LoadError::invalid(key, "must not be empty"))
        }
        Some(path) => Ok(path),
        None => Ok(Path::new(default).to_path_buf()),
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
