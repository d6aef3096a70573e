//! Batched background preloading of the static tier.
//!
//! A run is a persisted checkpoint ([`PreloadState`]) that scheduler ticks
//! advance one batch at a time. Operators start and cancel runs from another
//! process, so every transition reloads the checkpoint, applies its
//! check-then-act, and writes it back while holding the record lock of the
//! state backend.
//!
//! ```text
//! Idle --start--> Running --tick(last batch)--> Idle
//!                    |
//!                 cancel --> Cancelling --tick--> Idle
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{CacheConfig, ConfigCell};
use super::keys::{KeyIndex, Tier};
use super::store::EntryStore;
use crate::domain::content::{ContentCatalog, Renderer};
use crate::domain::error::ContentError;
use crate::domain::types::ContentId;
use crate::infra::state::{StateError, StateStore};
use crate::util::clock::Clock;

pub const METRIC_PRELOAD_RENDERED: &str = "supercache_preload_rendered_total";

const PENDING_CANCEL_WARNING: &str =
    "Pending preload cancel. It may take up to a minute for it to cancel completely.";

/// Persisted checkpoint of the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Catalog position of the next batch.
    pub cursor: u64,
    pub total: u64,
    pub cancel_requested: bool,
    pub active: bool,
    #[serde(
        with = "time::serde::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<OffsetDateTime>,
}

impl PreloadState {
    fn started(run_id: Uuid, total: u64, now: OffsetDateTime) -> Self {
        Self {
            run_id: Some(run_id),
            cursor: 0,
            total,
            cancel_requested: false,
            active: true,
            started_at: Some(now),
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn phase(&self) -> PreloadPhase {
        match (self.active, self.cancel_requested) {
            (false, _) => PreloadPhase::Idle,
            (true, false) => PreloadPhase::Running,
            (true, true) => PreloadPhase::Cancelling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPhase {
    Idle,
    Running,
    Cancelling,
}

/// Read-only view of the run handed to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadStatus {
    pub phase: PreloadPhase,
    pub run_id: Option<Uuid>,
    pub cursor: u64,
    pub total: u64,
    pub batch_size: u64,
    pub started_at: Option<OffsetDateTime>,
}

impl PreloadStatus {
    fn new(state: &PreloadState, batch_size: u64) -> Self {
        Self {
            phase: state.phase(),
            run_id: state.run_id,
            cursor: state.cursor,
            total: state.total,
            batch_size,
            started_at: state.started_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != PreloadPhase::Idle
    }

    pub fn is_cancelling(&self) -> bool {
        self.phase == PreloadPhase::Cancelling
    }

    pub fn describe(&self) -> String {
        match self.phase {
            PreloadPhase::Idle => "Not currently preloading.".to_string(),
            _ if self.cursor == 0 => format!(
                "Preload of {} posts scheduled; waiting for the first batch.",
                self.total
            ),
            _ => format!(
                "Currently caching from post {} to {}.",
                self.cursor.saturating_sub(self.batch_size),
                self.cursor
            ),
        }
    }

    pub fn warning(&self) -> Option<&'static str> {
        self.is_cancelling().then_some(PENDING_CANCEL_WARNING)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    Cache,
    Preload,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisabledReason::Cache => f.write_str("the page cache is not enabled"),
            DisabledReason::Preload => f.write_str("cache preloading is not enabled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("{0}")]
    Disabled(DisabledReason),
    #[error("cache preloading is already in progress")]
    AlreadyRunning,
    #[error("a preload cancel is already pending")]
    AlreadyCancelling,
    #[error("not currently preloading")]
    NotRunning,
    #[error(transparent)]
    State(#[from] StateError),
    #[error("content catalog unavailable: {0}")]
    Catalog(#[source] ContentError),
}

/// What a scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// A run exists but the cache or preloading is switched off.
    Paused(DisabledReason),
    Advanced { cursor: u64, total: u64, rendered: usize },
    Completed { total: u64, rendered: usize },
    Cancelled { cursor: u64 },
    /// The run was replaced or reset while the batch was rendering.
    Superseded,
    /// Catalog or state access failed; the run is retried next tick.
    Failed,
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchCounts {
    rendered: usize,
    fresh: usize,
    failed: usize,
}

enum Step {
    Idle,
    Cancelled { cursor: u64 },
    Batch { run_id: Option<Uuid>, cursor: u64, total: u64 },
}

pub struct Preloader {
    store: Arc<EntryStore>,
    config: Arc<ConfigCell>,
    states: StateStore,
    catalog: Arc<dyn ContentCatalog>,
    renderer: Arc<dyn Renderer>,
    clock: Arc<dyn Clock>,
    ticking: tokio::sync::Mutex<()>,
}

impl Preloader {
    pub fn new(
        store: Arc<EntryStore>,
        config: Arc<ConfigCell>,
        states: StateStore,
        catalog: Arc<dyn ContentCatalog>,
        renderer: Arc<dyn Renderer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            states,
            catalog,
            renderer,
            clock,
            ticking: tokio::sync::Mutex::new(()),
        }
    }

    /// Schedules a new run starting at the first catalog item.
    pub async fn start(&self) -> Result<PreloadStatus, PreloadError> {
        self.ensure_allowed()?;
        if self.states.load_preload()?.active {
            return Err(PreloadError::AlreadyRunning);
        }

        let total = self.catalog.count().await.map_err(PreloadError::Catalog)?;
        let batch_size = self.batch_size();
        let now = self.clock.now();
        let status = self.transition(|state| {
            if state.active {
                return Err(PreloadError::AlreadyRunning);
            }
            *state = PreloadState::started(Uuid::new_v4(), total, now);
            Ok(PreloadStatus::new(state, batch_size))
        })?;

        info!(
            run_id = ?status.run_id,
            total,
            batch_size,
            "Preload scheduled"
        );
        Ok(status)
    }

    /// Flags the running run for cancellation at the next tick.
    pub fn request_cancel(&self) -> Result<PreloadStatus, PreloadError> {
        let batch_size = self.batch_size();
        let status = self.transition(|state| {
            if !state.active {
                return Err(PreloadError::NotRunning);
            }
            if state.cancel_requested {
                return Err(PreloadError::AlreadyCancelling);
            }
            state.cancel_requested = true;
            Ok(PreloadStatus::new(state, batch_size))
        })?;

        info!(run_id = ?status.run_id, cursor = status.cursor, "Preload cancel requested");
        Ok(status)
    }

    /// Current run status. A checkpoint that cannot be read reports idle.
    pub fn status_snapshot(&self) -> PreloadStatus {
        let state = self.states.load_preload().unwrap_or_else(|err| {
            warn!(error = %err, "Preload checkpoint unreadable; reporting idle");
            PreloadState::default()
        });
        PreloadStatus::new(&state, self.batch_size())
    }

    /// Resets a run left behind by a scheduler that is no longer alive.
    ///
    /// Only runs that had already made progress or were being cancelled are
    /// reset. A run that was scheduled but never ticked is still waiting for
    /// its first batch and stays queued.
    pub fn recover(&self) -> Result<bool, PreloadError> {
        self.transition(|state| {
            if state.active && (state.cursor > 0 || state.cancel_requested) {
                warn!(
                    run_id = ?state.run_id,
                    cursor = state.cursor,
                    total = state.total,
                    "Resetting preload run abandoned by a previous scheduler"
                );
                state.reset();
                return Ok(true);
            }
            Ok(false)
        })
    }

    /// Scheduler entry point. Never fails; errors are logged and the next
    /// tick retries from the persisted cursor.
    pub async fn on_tick(&self) -> TickOutcome {
        let _ticking = self.ticking.lock().await;
        match self.tick().await {
            Ok(outcome) => {
                match outcome {
                    TickOutcome::Completed { total, rendered } => {
                        info!(total, rendered, "Preload complete")
                    }
                    TickOutcome::Cancelled { cursor } => info!(cursor, "Preload cancelled"),
                    TickOutcome::Advanced {
                        cursor,
                        total,
                        rendered,
                    } => debug!(cursor, total, rendered, "Preload batch done"),
                    TickOutcome::Paused(reason) => debug!(%reason, "Preload paused"),
                    _ => {}
                }
                outcome
            }
            Err(err) => {
                warn!(error = %err, "Preload tick failed");
                TickOutcome::Failed
            }
        }
    }

    async fn tick(&self) -> Result<TickOutcome, PreloadError> {
        let step = self.transition(|state| {
            if !state.active {
                return Ok(Step::Idle);
            }
            if state.cancel_requested {
                let cursor = state.cursor;
                state.reset();
                return Ok(Step::Cancelled { cursor });
            }
            Ok(Step::Batch {
                run_id: state.run_id,
                cursor: state.cursor,
                total: state.total,
            })
        })?;

        let (run_id, cursor, total) = match step {
            Step::Idle => return Ok(TickOutcome::Idle),
            Step::Cancelled { cursor } => return Ok(TickOutcome::Cancelled { cursor }),
            Step::Batch {
                run_id,
                cursor,
                total,
            } => (run_id, cursor, total),
        };

        match self.ensure_allowed() {
            Ok(()) => {}
            Err(PreloadError::Disabled(reason)) => return Ok(TickOutcome::Paused(reason)),
            Err(err) => return Err(err),
        }

        let batch_size = self.batch_size();
        let limit = batch_size.min(total.saturating_sub(cursor));
        let ids = if limit == 0 {
            Vec::new()
        } else {
            self.catalog
                .list(cursor, limit)
                .await
                .map_err(PreloadError::Catalog)?
        };
        let counts = self.warm_batch(&ids).await;
        if counts.failed > 0 {
            warn!(
                cursor,
                failed = counts.failed,
                rendered = counts.rendered,
                "Some preload items failed and were skipped"
            );
        }

        let next = cursor.saturating_add(batch_size).min(total);
        self.transition(|state| {
            if !state.active || state.run_id != run_id {
                return Ok(TickOutcome::Superseded);
            }
            if next >= state.total {
                let total = state.total;
                state.reset();
                return Ok(TickOutcome::Completed {
                    total,
                    rendered: counts.rendered,
                });
            }
            state.cursor = next;
            Ok(TickOutcome::Advanced {
                cursor: next,
                total: state.total,
                rendered: counts.rendered,
            })
        })
    }

    async fn warm_batch(&self, ids: &[ContentId]) -> BatchCounts {
        let (variants, ttl) = self
            .config
            .read(|config| (KeyIndex::static_variants(config), config.entry_ttl()));
        let mut counts = BatchCounts::default();

        for &content_id in ids {
            let mut pending = Vec::with_capacity(variants.len());
            for variant in &variants {
                let key = KeyIndex::derive_key(content_id, variant).in_tier(Tier::Static);
                if self.store.is_fresh(&key) {
                    counts.fresh += 1;
                    continue;
                }
                pending.push(async move {
                    let rendered = self.renderer.render(content_id, variant).await;
                    (key, rendered)
                });
            }

            for (key, rendered) in join_all(pending).await {
                let stored = match rendered {
                    Ok(body) => self.store.put(&key, &body, ttl).map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                match stored {
                    Ok(_) => {
                        counts.rendered += 1;
                        counter!(METRIC_PRELOAD_RENDERED).increment(1);
                    }
                    Err(error) => {
                        counts.failed += 1;
                        warn!(content_id = %content_id, key = %key, error, "Preload item skipped");
                    }
                }
            }
        }

        debug!(
            items = ids.len(),
            rendered = counts.rendered,
            fresh = counts.fresh,
            failed = counts.failed,
            "Preload batch rendered"
        );
        counts
    }

    fn ensure_allowed(&self) -> Result<(), PreloadError> {
        if !self.states.load_switch()?.enabled {
            return Err(PreloadError::Disabled(DisabledReason::Cache));
        }
        if !self.config.read(|config| config.preload.enabled) {
            return Err(PreloadError::Disabled(DisabledReason::Preload));
        }
        Ok(())
    }

    fn batch_size(&self) -> u64 {
        self.config.read(CacheConfig::preload_batch_size)
    }

    fn transition<R>(
        &self,
        apply: impl FnOnce(&mut PreloadState) -> Result<R, PreloadError>,
    ) -> Result<R, PreloadError> {
        self.states.update_preload(apply)
    }
}
