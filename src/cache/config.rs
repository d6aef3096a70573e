//! Cache configuration.
//!
//! Persisted as the `config` record of the state store and shared through a
//! [`ConfigCell`]. The only bulk mutation is [`CacheConfig::with_defaults`],
//! which the controller applies and persists in one write.

use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::config";

pub const DEFAULT_GC_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_GC_MAX_RUN_SECS: u64 = 1800;
pub const DEFAULT_PRELOAD_BATCH_SIZE: u64 = 100;
pub const DEFAULT_ENTRY_TTL_SECS: u64 = 3600;
/// Upper bound for `entry_ttl_secs`: one year.
pub const MAX_ENTRY_TTL_SECS: u64 = 366 * 24 * 3600;

/// User agent substrings that mark a request as mobile.
pub const MOBILE_BROWSERS: &[&str] = &[
    "2.0 MMP",
    "240x320",
    "400X240",
    "AvantGo",
    "BlackBerry",
    "Blazer",
    "Cellphone",
    "Danger",
    "DoCoMo",
    "Elaine/3.0",
    "EudoraWeb",
    "Googlebot-Mobile",
    "hiptop",
    "IEMobile",
    "KYOCERA/WX310K",
    "LG/U990",
    "MIDP-2.",
    "MMEF20",
    "MOT-V",
    "NetFront",
    "Newt",
    "Nintendo Wii",
    "Nitro",
    "Nokia",
    "Opera Mini",
    "Palm",
    "PlayStation Portable",
    "portalmmm",
    "Proxinet",
    "ProxiNet",
    "SHARP-TQ-GX10",
    "SHG-i900",
    "Small",
    "SonyEricsson",
    "Symbian OS",
    "SymbianOS",
    "TS21i-10",
    "UP.Browser",
    "UP.Link",
    "webOS",
    "Windows CE",
    "WinWAP",
    "YahooSeeker/M1A1-R2D2",
    "iPhone",
    "iPod",
    "Android",
    "BlackBerry9530",
    "LG-TU915 Obigo",
    "LGE VX",
    "Nokia5800",
];

/// Four-character user agent prefixes that mark a request as mobile.
pub const MOBILE_PREFIXES: &[&str] = &[
    "w3c ", "w3c-", "acs-", "alav", "alca", "amoi", "audi", "avan", "benq", "bird", "blac", "blaz",
    "brew", "cell", "cldc", "cmd-", "dang", "doco", "eric", "hipt", "htc_", "inno", "ipaq", "ipod",
    "jigs", "kddi", "keji", "leno", "lg-c", "lg-d", "lg-g", "lge-", "lg/u", "maui", "maxo", "midp",
    "mits", "mmef", "mobi", "mot-", "moto", "mwbp", "nec-", "newt", "noki", "palm", "pana", "pant",
    "phil", "play", "port", "prox", "qwap", "sage", "sams", "sany", "sch-", "sec-", "send", "seri",
    "sgh-", "shar", "sie-", "siem", "smal", "smar", "sony", "sph-", "symb", "t-mo", "teli", "tim-",
    "tosh", "tsm-", "upg1", "upsi", "vk-v", "voda", "wap-", "wapa", "wapi", "wapp", "wapr", "webc",
    "winw", "xda ", "xda-",
];

/// How garbage collection is triggered. Only fixed intervals are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcSchedule {
    #[serde(default)]
    pub kind: ScheduleKind,
    pub interval_secs: u64,
    pub max_run_secs: u64,
}

impl Default for GcSchedule {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::Interval,
            interval_secs: DEFAULT_GC_INTERVAL_SECS,
            max_run_secs: DEFAULT_GC_MAX_RUN_SECS,
        }
    }
}

impl GcSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MobileConfig {
    /// Serve mobile visitors their own cached copy.
    pub enabled: bool,
    pub browsers: Vec<String>,
    pub prefixes: Vec<String>,
    /// Named user agent groups, each cached as a separate device variant.
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    /// Content items rendered per scheduler tick.
    pub batch_size: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_PRELOAD_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// zstd-compress payloads at rest.
    pub compression: bool,
    /// The host serves static-tier files directly through rewrite rules.
    pub mod_rewrite: bool,
    /// Do not cache pages for visitors with a session.
    pub not_logged_in: bool,
    /// Do not cache requests that carry a query string.
    pub no_cache_for_get: bool,
    /// Keep serving a stale static copy while its replacement renders.
    pub rebuild_files: bool,
    /// The host already compresses responses; skip at-rest compression.
    pub host_output_compression: bool,
    /// Lifetime of a freshly stored entry.
    pub entry_ttl_secs: u64,
    pub gc: Option<GcSchedule>,
    pub mobile: MobileConfig,
    pub preload: PreloadConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compression: false,
            mod_rewrite: false,
            not_logged_in: false,
            no_cache_for_get: false,
            rebuild_files: false,
            host_output_compression: false,
            entry_ttl_secs: DEFAULT_ENTRY_TTL_SECS,
            gc: None,
            mobile: MobileConfig::default(),
            preload: PreloadConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Returns the recommended configuration derived from `self`.
    ///
    /// An existing GC schedule and the host compression flag are kept; every
    /// other recommended flag is switched on.
    pub fn with_defaults(&self) -> Self {
        let mut next = self.clone();
        if next.gc.is_none() {
            next.gc = Some(GcSchedule::default());
        }
        next.mobile.enabled = true;
        next.not_logged_in = true;
        next.no_cache_for_get = true;
        next.mod_rewrite = true;
        next.rebuild_files = true;
        if !next.host_output_compression {
            next.compression = true;
        }
        next.mobile.browsers = MOBILE_BROWSERS.iter().map(|s| (*s).to_string()).collect();
        next.mobile.prefixes = MOBILE_PREFIXES.iter().map(|s| (*s).to_string()).collect();
        next
    }

    /// Clamps values a hand-edited record may carry out of range.
    pub fn bounded(mut self) -> Self {
        if self.entry_ttl_secs > MAX_ENTRY_TTL_SECS {
            warn!(
                entry_ttl_secs = self.entry_ttl_secs,
                max = MAX_ENTRY_TTL_SECS,
                "Entry ttl out of range; clamping"
            );
            self.entry_ttl_secs = MAX_ENTRY_TTL_SECS;
        }
        self
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs.min(MAX_ENTRY_TTL_SECS))
    }

    /// Preload batch size, never zero.
    pub fn preload_batch_size(&self) -> u64 {
        self.preload.batch_size.max(1)
    }
}

/// Process-wide handle to the current [`CacheConfig`].
#[derive(Debug, Default)]
pub struct ConfigCell {
    inner: RwLock<CacheConfig>,
}

impl ConfigCell {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> CacheConfig {
        rw_read(&self.inner, SOURCE, "snapshot").clone()
    }

    /// Reads a projection without cloning the whole configuration.
    pub fn read<R>(&self, f: impl FnOnce(&CacheConfig) -> R) -> R {
        f(&rw_read(&self.inner, SOURCE, "read"))
    }

    pub fn replace(&self, config: CacheConfig) {
        *rw_write(&self.inner, SOURCE, "replace") = config;
    }
}
