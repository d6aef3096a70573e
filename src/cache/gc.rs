//! Garbage collection of expired entries.
//!
//! A pass walks [`EntryStore::scan_expired`] in fixed-size batches and yields
//! to the runtime between batches, so a large backlog never monopolizes a
//! worker. Passes are bounded by the schedule's maximum run time; whatever is
//! left is picked up by the next tick.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::config::{ConfigCell, GcSchedule};
use super::keys::CacheKey;
use super::store::EntryStore;
use crate::util::clock::Clock;

pub const DEFAULT_GC_BATCH_SIZE: usize = 100;

pub const METRIC_GC_REMOVED: &str = "supercache_gc_removed_total";
pub const METRIC_GC_PASS_MS: &str = "supercache_gc_pass_ms";

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed: usize,
    pub failed: usize,
    pub batches: usize,
    /// The pass hit its time budget before the scan was exhausted.
    pub truncated: bool,
}

pub struct GarbageCollector {
    store: Arc<EntryStore>,
    config: Arc<ConfigCell>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl GarbageCollector {
    pub fn new(store: Arc<EntryStore>, config: Arc<ConfigCell>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            batch_size: DEFAULT_GC_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The configured schedule, or the default one when none is installed.
    pub fn schedule(&self) -> GcSchedule {
        self.config.read(|config| config.gc).unwrap_or_default()
    }

    /// Removes entries that expired before the start of the pass.
    pub async fn run_pass(&self) -> GcReport {
        let started = Instant::now();
        let now = self.clock.now();
        let deadline = now + self.schedule().max_run();

        let mut report = GcReport::default();
        let mut scan = self.store.scan_expired(now);
        loop {
            let batch: Vec<CacheKey> = scan.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            report.batches += 1;

            for key in &batch {
                match self.store.delete_if_expired(key, now) {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(err) => {
                        report.failed += 1;
                        warn!(key = %key, error = %err, "Expired entry could not be removed");
                    }
                }
            }

            if self.clock.now() >= deadline {
                report.truncated = true;
                break;
            }
            tokio::task::yield_now().await;
        }

        counter!(METRIC_GC_REMOVED).increment(report.removed as u64);
        histogram!(METRIC_GC_PASS_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        report
    }

    /// Scheduler entry point. Never fails; a truncated or partially failed
    /// pass is retried by the next tick.
    pub async fn on_tick(&self) -> GcReport {
        let report = self.run_pass().await;
        if report.removed > 0 || report.failed > 0 || report.truncated {
            info!(
                removed = report.removed,
                failed = report.failed,
                batches = report.batches,
                truncated = report.truncated,
                "Garbage collection pass complete"
            );
        } else {
            debug!("Garbage collection pass found nothing to remove");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::KeyIndex;
    use crate::domain::types::{ContentId, Variant};
    use crate::util::clock::ManualClock;

    /// Jumps forward a fixed step every time it is read.
    struct SteppingClock {
        unix_seconds: AtomicI64,
        step: i64,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> OffsetDateTime {
            let seconds = self.unix_seconds.fetch_add(self.step, Ordering::SeqCst);
            OffsetDateTime::from_unix_timestamp(seconds).expect("valid timestamp")
        }
    }

    fn key(id: u64) -> CacheKey {
        KeyIndex::derive_key(ContentId::new(id), &Variant::anonymous_desktop())
    }

    #[tokio::test]
    async fn pass_removes_only_expired_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(ConfigCell::new(CacheConfig::default()));
        let clock = Arc::new(ManualClock::from_unix(1_700_000_000));
        let store = Arc::new(
            EntryStore::open(dir.path(), Arc::clone(&config), clock.clone()).expect("open"),
        );
        for id in 0..250 {
            store.put(&key(id), b"old", Duration::from_secs(10)).expect("put");
        }
        store.put(&key(999), b"fresh", Duration::from_secs(3600)).expect("put");
        clock.advance(Duration::from_secs(60));

        let gc = GarbageCollector::new(Arc::clone(&store), config, clock.clone());
        let report = gc.on_tick().await;

        assert_eq!(report.removed, 250);
        assert_eq!(report.failed, 0);
        assert_eq!(report.batches, 3);
        assert!(!report.truncated);
        assert_eq!(store.scan_expired(clock.now()).count(), 0);
        assert!(store.get(&key(999)).expect("get").is_some());
    }

    #[tokio::test]
    async fn pass_stops_at_its_time_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(ConfigCell::new(CacheConfig::default()));
        let manual = Arc::new(ManualClock::from_unix(1_700_000_000));
        let store = Arc::new(
            EntryStore::open(dir.path(), Arc::clone(&config), manual.clone()).expect("open"),
        );
        for id in 0..30 {
            store.put(&key(id), b"old", Duration::from_secs(1)).expect("put");
        }

        // Every clock read moves a full budget forward.
        let stepping = Arc::new(SteppingClock {
            unix_seconds: AtomicI64::new(1_700_000_100),
            step: 1800,
        });
        let gc = GarbageCollector::new(Arc::clone(&store), config, stepping).with_batch_size(10);
        let report = gc.run_pass().await;

        assert!(report.truncated);
        assert_eq!(report.batches, 1);
        assert_eq!(report.removed, 10);

        let rest = gc.run_pass().await;
        assert_eq!(rest.removed, 10);
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(ConfigCell::new(CacheConfig::default()));
        let clock = Arc::new(ManualClock::from_unix(1_700_000_000));
        let store = Arc::new(
            EntryStore::open(dir.path(), Arc::clone(&config), clock.clone()).expect("open"),
        );
        let gc = GarbageCollector::new(store, config, clock);
        assert_eq!(gc.on_tick().await, GcReport::default());
    }
}
