//! Per-tier cache statistics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use super::keys::Tier;
use super::store::EntryStore;
use crate::infra::state::{StateError, StateStore};
use crate::util::clock::Clock;

/// Snapshots older than this are not reported.
pub const STATS_MAX_AGE: Duration = Duration::hours(24);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub cached: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    #[serde(with = "time::serde::timestamp")]
    pub generated_at: OffsetDateTime,
    pub dynamic: TierStats,
    #[serde(rename = "static")]
    pub static_tier: TierStats,
}

impl StatsSnapshot {
    pub fn tier(&self, tier: Tier) -> TierStats {
        match tier {
            Tier::Dynamic => self.dynamic,
            Tier::Static => self.static_tier,
        }
    }

    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        now - self.generated_at > STATS_MAX_AGE
    }
}

pub struct StatsCollector {
    store: Arc<EntryStore>,
    states: StateStore,
    clock: Arc<dyn Clock>,
}

impl StatsCollector {
    pub fn new(store: Arc<EntryStore>, states: StateStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            states,
            clock,
        }
    }

    /// Counts both tiers and persists the result as the latest snapshot.
    ///
    /// The store index is first reconciled with the disk, so entries other
    /// processes added or removed are counted correctly. If that fails the
    /// current index is counted as is.
    pub fn collect(&self) -> Result<StatsSnapshot, StateError> {
        if let Err(err) = self.store.resync() {
            warn!(error = %err, "Entry store resync failed; counting the current index");
        }
        let now = self.clock.now();
        let tier_stats = |tier| {
            let counts = self.store.tier_counts(tier, now);
            TierStats {
                cached: counts.cached,
                expired: counts.expired,
            }
        };
        let snapshot = StatsSnapshot {
            generated_at: now,
            dynamic: tier_stats(Tier::Dynamic),
            static_tier: tier_stats(Tier::Static),
        };
        self.states.save_stats(&snapshot)?;
        debug!(
            dynamic_cached = snapshot.dynamic.cached,
            dynamic_expired = snapshot.dynamic.expired,
            static_cached = snapshot.static_tier.cached,
            static_expired = snapshot.static_tier.expired,
            "Cache stats collected"
        );
        Ok(snapshot)
    }

    pub fn latest(&self) -> Result<Option<StatsSnapshot>, StateError> {
        self.states.load_stats()
    }

    pub fn is_stale(&self, snapshot: &StatsSnapshot) -> bool {
        snapshot.is_stale(self.clock.now())
    }
}
