//! Cache controller facade.
//!
//! The only entry point the operator surface talks to. Each operation either
//! returns a typed outcome or one [`ControlError`] kind; outcomes render as a
//! [`Report`] for the terminal.

use std::sync::Arc;

use time::format_description::well_known::Rfc2822;
use tracing::{info, warn};

use super::error::ControlError;
use super::report::Report;
use crate::cache::{
    CacheConfig, ConfigCell, DisabledReason, InvalidationEngine, KeyIndex, PreloadStatus,
    Preloader, ResolveError, StatsCollector, StatsSnapshot, Tier,
};
use crate::domain::types::ContentId;
use crate::infra::state::{StateStore, SwitchState};

const PRELOAD_CANCEL_SCHEDULED: &str = "Scheduled preloading of cache almost cancelled. It may take up to a minute for it to cancel completely.";

/// What a flush should purge. Raw operator input is validated by the
/// controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushSelector {
    All,
    ContentId(String),
    Permalink(String),
}

impl FlushSelector {
    pub fn from_options(post_id: Option<String>, permalink: Option<String>) -> Self {
        match (post_id, permalink) {
            (Some(raw), _) => FlushSelector::ContentId(raw),
            (None, Some(raw)) => FlushSelector::Permalink(raw),
            (None, None) => FlushSelector::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadAction {
    Start,
    Status,
    Cancel,
}

impl PreloadAction {
    pub fn from_flags(status: bool, cancel: bool) -> Self {
        if status {
            PreloadAction::Status
        } else if cancel {
            PreloadAction::Cancel
        } else {
            PreloadAction::Start
        }
    }
}

/// Proof that the caller may change cache-wide configuration.
///
/// Only the operator binary and tests construct one.
#[derive(Debug, Clone)]
pub struct TrustedContext {
    actor: String,
}

impl TrustedContext {
    pub fn operator(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Cleared { removed: usize },
    Content { content_id: ContentId, removed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    pub enabled: bool,
    pub snapshot: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadOutcome {
    Scheduled(PreloadStatus),
    Status(PreloadStatus),
    CancelRequested(PreloadStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultsOutcome {
    pub config: CacheConfig,
    /// A GC schedule was installed because none was configured.
    pub gc_installed: bool,
}

pub struct CacheController {
    keys: KeyIndex,
    invalidation: Arc<InvalidationEngine>,
    preloader: Arc<Preloader>,
    stats: Arc<StatsCollector>,
    config: Arc<ConfigCell>,
    states: StateStore,
}

impl CacheController {
    pub fn new(
        keys: KeyIndex,
        invalidation: Arc<InvalidationEngine>,
        preloader: Arc<Preloader>,
        stats: Arc<StatsCollector>,
        config: Arc<ConfigCell>,
        states: StateStore,
    ) -> Self {
        Self {
            keys,
            invalidation,
            preloader,
            stats,
            config,
            states,
        }
    }

    pub async fn flush(&self, selector: FlushSelector) -> Result<FlushOutcome, ControlError> {
        let content_id = match selector {
            FlushSelector::All => {
                let removed = self.invalidation.invalidate_all()?;
                self.refresh_stats();
                return Ok(FlushOutcome::Cleared { removed });
            }
            FlushSelector::ContentId(raw) => raw
                .parse::<ContentId>()
                .map_err(|_| ControlError::invalid_selector(raw))?,
            FlushSelector::Permalink(raw) => match self.keys.resolve_identifier(&raw).await {
                Ok(content_id) => content_id,
                Err(ResolveError::Invalid(input)) => return Err(ControlError::invalid_selector(input)),
                Err(ResolveError::NotFound(_)) => return Err(ControlError::NotFound),
                Err(ResolveError::Content(err)) => return Err(err.into()),
            },
        };

        let removed = self.invalidation.invalidate(content_id)?;
        self.refresh_stats();
        Ok(FlushOutcome::Content {
            content_id,
            removed,
        })
    }

    pub fn status(&self) -> Result<CacheStatus, ControlError> {
        let snapshot = self.stats.latest()?.ok_or(ControlError::NoStats)?;
        if self.stats.is_stale(&snapshot) {
            return Err(ControlError::StaleStats);
        }
        let enabled = self.states.load_switch()?.enabled;
        Ok(CacheStatus { enabled, snapshot })
    }

    pub fn enable(&self) -> Result<(), ControlError> {
        self.set_enabled(true)
    }

    pub fn disable(&self) -> Result<(), ControlError> {
        self.set_enabled(false)
    }

    pub async fn preload(&self, action: PreloadAction) -> Result<PreloadOutcome, ControlError> {
        self.ensure_preload_allowed()?;
        match action {
            PreloadAction::Start => Ok(PreloadOutcome::Scheduled(self.preloader.start().await?)),
            PreloadAction::Status => Ok(PreloadOutcome::Status(self.preloader.status_snapshot())),
            PreloadAction::Cancel => Ok(PreloadOutcome::CancelRequested(
                self.preloader.request_cancel()?,
            )),
        }
    }

    /// Current progress, for printing alongside an `AlreadyRunning` error.
    pub fn preload_status(&self) -> PreloadStatus {
        self.preloader.status_snapshot()
    }

    /// Installs the recommended configuration and enables the cache.
    ///
    /// The new configuration is derived from the persisted one, written as a
    /// single record, and only then published to this process.
    pub fn apply_defaults(&self, trusted: &TrustedContext) -> Result<DefaultsOutcome, ControlError> {
        let (current, next) = self
            .states
            .update_config(|| self.config.snapshot(), CacheConfig::with_defaults)?;
        self.config.replace(next.clone());
        self.enable()?;

        let gc_installed = current.gc.is_none();
        info!(
            actor = trusted.actor(),
            gc_installed,
            compression = next.compression,
            "Recommended cache settings installed"
        );
        Ok(DefaultsOutcome {
            config: next,
            gc_installed,
        })
    }

    /// Recounts after a flush so `status` does not report removed entries.
    /// Without a previous snapshot nothing is written; collecting stays the
    /// scheduler's job.
    fn refresh_stats(&self) {
        let refreshed = match self.stats.latest() {
            Ok(Some(_)) => self.stats.collect().map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = refreshed {
            warn!(error = %err, "Cache stats could not be refreshed after flush");
        }
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.states.save_switch(&SwitchState { enabled })?;
        let confirmed = self.states.load_switch()?.enabled;
        if confirmed != enabled {
            return Err(ControlError::NotConfirmed { expected: enabled });
        }
        info!(enabled, "Cache switch updated");
        Ok(())
    }

    fn ensure_preload_allowed(&self) -> Result<(), ControlError> {
        if !self.states.load_switch()?.enabled {
            return Err(ControlError::Disabled(DisabledReason::Cache));
        }
        if !self.config.read(|config| config.preload.enabled) {
            return Err(ControlError::Disabled(DisabledReason::Preload));
        }
        Ok(())
    }
}

impl FlushOutcome {
    pub fn report(&self) -> Report {
        match self {
            FlushOutcome::Cleared { .. } => Report::success("Cache cleared."),
            FlushOutcome::Content {
                content_id,
                removed,
            } => Report::success(format!(
                "Cache cleared for post {content_id} ({removed} entries removed)."
            )),
        }
    }
}

impl CacheStatus {
    pub fn report(&self) -> Report {
        let generated = self
            .snapshot
            .generated_at
            .format(&Rfc2822)
            .unwrap_or_else(|_| self.snapshot.generated_at.unix_timestamp().to_string());

        let mut report = Report::new()
            .with_line(format!(
                "Cache status: {}",
                if self.enabled { "On" } else { "Off" }
            ))
            .with_line(format!("Cache content on {generated}: "));
        for tier in Tier::ALL {
            let stats = self.snapshot.tier(tier);
            report = report
                .with_line("")
                .with_line(format!("    {}:", tier.label()))
                .with_line(format!("        Cached: {}", stats.cached))
                .with_line(format!("        Expired: {}", stats.expired));
        }
        report
    }
}

impl PreloadOutcome {
    pub fn report(&self) -> Report {
        match self {
            PreloadOutcome::Scheduled(_) => {
                Report::success("Scheduled preload for next scheduler run.")
            }
            PreloadOutcome::Status(status) => {
                let report = Report::new().with_line(status.describe());
                match status.warning() {
                    Some(warning) => report.with_warning(warning),
                    None => report,
                }
            }
            PreloadOutcome::CancelRequested(_) => Report::success(PRELOAD_CANCEL_SCHEDULED),
        }
    }
}

impl DefaultsOutcome {
    pub fn report(&self) -> Report {
        let report = Report::success("Recommended cache settings installed.");
        let report = match self.config.gc.filter(|_| self.gc_installed) {
            Some(gc) => report.with_line(format!(
                "Garbage collection scheduled every {} seconds.",
                gc.interval_secs
            )),
            None => report,
        };
        report.with_success(enabled_message(true))
    }
}

pub fn enabled_message(enabled: bool) -> &'static str {
    if enabled {
        "The page cache is enabled."
    } else {
        "The page cache is disabled."
    }
}
