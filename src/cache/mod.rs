//! Supercache core
//!
//! A disk-backed page cache with two tiers:
//!
//! - **Dynamic**: every cacheable request variant of a page
//! - **Static**: fully rendered anonymous pages the host can serve directly
//!
//! Entries are invalidated per content item, swept by a time-bounded garbage
//! collector, and the static tier can be rebuilt ahead of traffic by the
//! batched preloader.
//!
//! ## Configuration
//!
//! Behavior is controlled by [`CacheConfig`], persisted in the state store:
//!
//! ```toml
//! compression = true
//! entry_ttl_secs = 3600
//!
//! [gc]
//! kind = "interval"
//! interval_secs = 600
//! max_run_secs = 1800
//!
//! [preload]
//! enabled = true
//! batch_size = 100
//! ```

mod config;
mod gc;
mod invalidation;
mod keys;
pub(crate) mod lock;
mod preload;
mod stats;
mod store;

pub use config::{
    CacheConfig, ConfigCell, DEFAULT_GC_INTERVAL_SECS, DEFAULT_GC_MAX_RUN_SECS,
    DEFAULT_PRELOAD_BATCH_SIZE, GcSchedule, MAX_ENTRY_TTL_SECS, MOBILE_BROWSERS, MOBILE_PREFIXES,
    MobileConfig, PreloadConfig, ScheduleKind,
};
pub use gc::{
    DEFAULT_GC_BATCH_SIZE, GarbageCollector, GcReport, METRIC_GC_PASS_MS, METRIC_GC_REMOVED,
};
pub use invalidation::InvalidationEngine;
pub use keys::{CacheKey, KeyIndex, ParseCacheKeyError, ResolveError, Tier, normalize_permalink};
pub use preload::{
    DisabledReason, METRIC_PRELOAD_RENDERED, PreloadError, PreloadPhase, PreloadState,
    PreloadStatus, Preloader, TickOutcome,
};
pub use stats::{STATS_MAX_AGE, StatsCollector, StatsSnapshot, TierStats};
pub use store::{
    CacheEntry, EntryStore, ExpiredScan, METRIC_STORE_HIT, METRIC_STORE_MISS, StoreError,
    TierCounts,
};
