//! Disk-backed entry storage.
//!
//! Each entry lives in its own file under
//! `<root>/<tier>/<digest[0..2]>/<digest>.entry`: one JSON header line
//! followed by the (optionally zstd-compressed) payload. Files are written to
//! a temporary sibling and renamed into place, so readers never observe a
//! torn entry.
//!
//! The in-memory index is a sharded map of per-key slots. A slot's lock
//! covers both its metadata and its file, which gives every key a single
//! writer while unrelated keys proceed in parallel.
//!
//! Other processes share the same directory, so the index is only a hint:
//! freshness checks re-read the entry header, and [`EntryStore::resync`]
//! reconciles the whole index with the disk.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::config::ConfigCell;
use super::keys::{CacheKey, Tier};
use crate::domain::types::ContentId;
use super::lock::{rw_read, rw_try_read, rw_write};
use crate::util::clock::Clock;

const SOURCE: &str = "cache::store";
const ENTRY_EXTENSION: &str = "entry";
const ZSTD_LEVEL: i32 = 3;

pub const METRIC_STORE_HIT: &str = "supercache_store_hit_total";
pub const METRIC_STORE_MISS: &str = "supercache_store_miss_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache i/o failed for `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache entry `{path}` is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("ttl of {ttl_secs} seconds for `{key}` is out of range")]
    TtlOutOfRange { key: String, ttl_secs: u64 },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A stored page as handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Decompressed page bytes.
    pub payload: Bytes,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Whether the payload is compressed at rest.
    pub compressed: bool,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct EntryMeta {
    #[serde(with = "time::serde::timestamp")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    expires_at: OffsetDateTime,
    compressed: bool,
    /// Payload length as stored.
    stored_len: u64,
}

impl EntryMeta {
    fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    #[serde(flatten)]
    meta: EntryMeta,
}

#[derive(Debug, Default)]
struct Slot {
    meta: RwLock<Option<EntryMeta>>,
}

impl Slot {
    fn holding(meta: EntryMeta) -> Arc<Self> {
        Arc::new(Self {
            meta: RwLock::new(Some(meta)),
        })
    }
}

/// Counts for one tier, taken without blocking writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub cached: u64,
    pub expired: u64,
}

pub struct EntryStore {
    root: PathBuf,
    config: Arc<ConfigCell>,
    clock: Arc<dyn Clock>,
    slots: DashMap<CacheKey, Arc<Slot>>,
}

impl EntryStore {
    /// Opens the store at `root`, rebuilding the index from the entries
    /// already on disk. Unreadable entries are logged and left alone.
    pub fn open(
        root: impl Into<PathBuf>,
        config: Arc<ConfigCell>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        let store = Self {
            root,
            config,
            clock,
            slots: DashMap::new(),
        };

        for tier in Tier::ALL {
            let dir = store.tier_dir(tier);
            fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
            for (key, meta) in store.read_tier(tier)? {
                store.slots.insert(key, Slot::holding(meta));
            }
        }

        debug!(
            root = %store.root.display(),
            entries = store.slots.len(),
            "Entry store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of entries currently indexed, expired or not.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|item| rw_read(&item.value().meta, SOURCE, "len").is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live entry for `key`; expired entries read as a miss.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let Some(slot) = self.slot(key) else {
            counter!(METRIC_STORE_MISS).increment(1);
            return Ok(None);
        };

        let guard = rw_read(&slot.meta, SOURCE, "get");
        let meta = match *guard {
            Some(meta) if !meta.is_expired_at(self.clock.now()) => meta,
            _ => {
                counter!(METRIC_STORE_MISS).increment(1);
                return Ok(None);
            }
        };

        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                drop(guard);
                debug!(key = %key, "Cache entry was removed by another process");
                if let Err(err) = self.reload(key) {
                    warn!(key = %key, error = %err, "Cache entry could not be re-indexed");
                }
                counter!(METRIC_STORE_MISS).increment(1);
                return Ok(None);
            }
            Err(err) => return Err(StoreError::io(path, err)),
        };
        drop(guard);

        let (_, body) = split_entry(&path, &raw)?;
        let payload = if meta.compressed {
            zstd::decode_all(body).map_err(|err| StoreError::io(&path, err))?
        } else {
            body.to_vec()
        };

        counter!(METRIC_STORE_HIT).increment(1);
        Ok(Some(CacheEntry {
            key: key.clone(),
            payload: Bytes::from(payload),
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            compressed: meta.compressed,
        }))
    }

    /// Whether `key` holds an entry that has not expired yet.
    ///
    /// The header is re-read from disk, so entries removed or rewritten by
    /// another process are seen. An unreadable entry counts as stale.
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        match self.reload(key) {
            Ok(meta) => meta.is_some_and(|meta| !meta.is_expired_at(self.clock.now())),
            Err(err) => {
                warn!(key = %key, error = %err, "Cache entry header unreadable");
                false
            }
        }
    }

    /// Stores `payload` under `key`, replacing any previous entry.
    pub fn put(&self, key: &CacheKey, payload: &[u8], ttl: Duration) -> Result<CacheEntry, StoreError> {
        let compressed = self.config.read(|config| config.compression);
        let path = self.entry_path(key);
        let stored = if compressed {
            zstd::encode_all(payload, ZSTD_LEVEL).map_err(|err| StoreError::io(&path, err))?
        } else {
            payload.to_vec()
        };

        let created_at = self.clock.now();
        let expires_at = time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add(ttl))
            .ok_or_else(|| StoreError::TtlOutOfRange {
                key: key.to_string(),
                ttl_secs: ttl.as_secs(),
            })?;
        let meta = EntryMeta {
            created_at,
            expires_at,
            compressed,
            stored_len: stored.len() as u64,
        };

        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let mut guard = rw_write(&slot.meta, SOURCE, "put");
        write_entry(&path, key, &meta, &stored)?;
        *guard = Some(meta);
        drop(guard);

        Ok(CacheEntry {
            key: key.clone(),
            payload: Bytes::copy_from_slice(payload),
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            compressed,
        })
    }

    /// Removes `key`. Returns `false` when there was nothing to remove.
    ///
    /// The file is removed even when this process never indexed it.
    pub fn delete(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.remove_where(key, "delete", |_| true)
    }

    /// Removes `key` only if its entry expires at or before `before`. The
    /// check and the removal happen under the slot lock, so an entry
    /// refreshed concurrently survives.
    pub fn delete_if_expired(
        &self,
        key: &CacheKey,
        before: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        self.remove_where(key, "delete_if_expired", |meta| {
            meta.is_some_and(|meta| meta.expires_at <= before)
        })
    }

    /// Indexed keys that belong to `content_id`, in any tier and variant.
    pub fn keys_for(&self, content_id: ContentId) -> Vec<CacheKey> {
        self.slots
            .iter()
            .filter(|item| item.key().content_id() == content_id)
            .map(|item| item.key().clone())
            .collect()
    }

    /// Lazily yields keys whose entries expire at or before `before`.
    ///
    /// Only the key set is captured up front; expiry is re-checked per key,
    /// so entries refreshed in the meantime are skipped. Calling again
    /// restarts the scan.
    pub fn scan_expired(&self, before: OffsetDateTime) -> ExpiredScan<'_> {
        let keys: Vec<CacheKey> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        ExpiredScan {
            store: self,
            before,
            keys: keys.into_iter(),
        }
    }

    /// Removes every entry in both tiers and returns how many were removed.
    /// Entries written by other processes are included.
    pub fn clear(&self) -> Result<usize, StoreError> {
        self.resync()?;
        let keys: Vec<CacheKey> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Per-tier cached and expired counts. Slots being written at the time
    /// of the call are skipped, so the result is approximate under load.
    pub fn tier_counts(&self, tier: Tier, now: OffsetDateTime) -> TierCounts {
        let mut counts = TierCounts::default();
        for item in self.slots.iter().filter(|item| item.key().tier() == tier) {
            let Some(guard) = rw_try_read(&item.value().meta, SOURCE, "tier_counts") else {
                continue;
            };
            match *guard {
                Some(meta) if meta.is_expired_at(now) => counts.expired += 1,
                Some(_) => counts.cached += 1,
                None => {}
            }
        }
        counts
    }

    /// Reconciles the index with the files on disk. Entries removed by
    /// another process are dropped and entries it wrote are picked up.
    pub fn resync(&self) -> Result<(), StoreError> {
        let indexed: BTreeSet<CacheKey> =
            self.slots.iter().map(|slot| slot.key().clone()).collect();
        let mut missing = 0;
        for key in &indexed {
            match self.reload(key) {
                Ok(Some(_)) => {}
                Ok(None) => missing += 1,
                Err(err) => warn!(key = %key, error = %err, "Cache entry could not be re-indexed"),
            }
        }

        let mut added = 0;
        for tier in Tier::ALL {
            for (key, meta) in self.read_tier(tier)? {
                if let Entry::Vacant(vacant) = self.slots.entry(key) {
                    vacant.insert(Slot::holding(meta));
                    added += 1;
                }
            }
        }

        debug!(missing, added, entries = self.slots.len(), "Entry store resynced");
        Ok(())
    }

    /// Re-reads the header of `key` under its slot lock and returns the
    /// current metadata; `None` when the file is gone.
    fn reload(&self, key: &CacheKey) -> Result<Option<EntryMeta>, StoreError> {
        let path = self.entry_path(key);
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let meta = {
            let mut guard = rw_write(&slot.meta, SOURCE, "reload");
            let meta = match read_header(&path) {
                Ok(header) => Some(indexed_key(&path, key.tier(), header)?.1),
                Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    None
                }
                Err(err) => return Err(err),
            };
            *guard = meta;
            meta
        };
        drop(slot);

        if meta.is_none() {
            self.prune(key);
        }
        Ok(meta)
    }

    fn remove_where(
        &self,
        key: &CacheKey,
        op: &'static str,
        should_remove: impl FnOnce(Option<EntryMeta>) -> bool,
    ) -> Result<bool, StoreError> {
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let removed = {
            let mut guard = rw_write(&slot.meta, SOURCE, op);
            if should_remove(*guard) {
                let path = self.entry_path(key);
                let on_disk = match fs::remove_file(&path) {
                    Ok(()) => true,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => false,
                    Err(err) => return Err(StoreError::io(path, err)),
                };
                guard.take().is_some() || on_disk
            } else {
                false
            }
        };
        drop(slot);

        self.prune(key);
        Ok(removed)
    }

    /// Drops the slot of `key` when it holds nothing and no other caller is
    /// about to use it.
    fn prune(&self, key: &CacheKey) {
        self.slots.remove_if(key, |_, slot| {
            Arc::strong_count(slot) == 1 && rw_read(&slot.meta, SOURCE, "prune").is_none()
        });
    }

    fn slot(&self, key: &CacheKey) -> Option<Arc<Slot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    fn expires_at(&self, key: &CacheKey) -> Option<OffsetDateTime> {
        let slot = self.slot(key)?;
        let guard = rw_read(&slot.meta, SOURCE, "expires_at");
        guard.map(|meta| meta.expires_at)
    }

    fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.as_str())
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let digest = key.digest();
        self.tier_dir(key.tier())
            .join(&digest[..2])
            .join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

    /// Every readable entry of `tier` on disk.
    fn read_tier(&self, tier: Tier) -> Result<Vec<(CacheKey, EntryMeta)>, StoreError> {
        let dir = self.tier_dir(tier);
        let mut entries = Vec::new();
        let shards = fs::read_dir(&dir).map_err(|err| StoreError::io(&dir, err))?;
        for shard in shards {
            let shard = shard.map_err(|err| StoreError::io(&dir, err))?;
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let files = fs::read_dir(&shard_path).map_err(|err| StoreError::io(&shard_path, err))?;
            for file in files {
                let path = file.map_err(|err| StoreError::io(&shard_path, err))?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                    continue;
                }
                match read_header(&path).and_then(|header| indexed_key(&path, tier, header)) {
                    Ok(entry) => entries.push(entry),
                    // Removed by another process mid-walk.
                    Err(StoreError::Io { source, .. })
                        if source.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "Skipping unreadable cache entry"
                        );
                    }
                }
            }
        }
        Ok(entries)
    }
}

/// Iterator returned by [`EntryStore::scan_expired`].
pub struct ExpiredScan<'a> {
    store: &'a EntryStore,
    before: OffsetDateTime,
    keys: std::vec::IntoIter<CacheKey>,
}

impl Iterator for ExpiredScan<'_> {
    type Item = CacheKey;

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            match self.store.expires_at(&key) {
                Some(at) if at <= self.before => return Some(key),
                Some(_) => {}
                // Emptied since the snapshot; drop the leftover slot.
                None => self.store.prune(&key),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}

fn write_entry(
    path: &Path,
    key: &CacheKey,
    meta: &EntryMeta,
    stored: &[u8],
) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::corrupt(path, "entry path has no parent directory"))?;
    fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;

    let header = EntryHeader {
        key: key.to_string(),
        meta: *meta,
    };
    let mut line = serde_json::to_vec(&header)
        .map_err(|err| StoreError::corrupt(path, format!("header encoding failed: {err}")))?;
    line.push(b'\n');

    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    tmp.write_all(&line)
        .and_then(|()| tmp.write_all(stored))
        .and_then(|()| tmp.flush())
        .map_err(|err| StoreError::io(tmp.path(), err))?;
    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

fn read_header(path: &Path) -> Result<EntryHeader, StoreError> {
    let file = File::open(path).map_err(|err| StoreError::io(path, err))?;
    let mut line = Vec::new();
    BufReader::new(file)
        .read_until(b'\n', &mut line)
        .map_err(|err| StoreError::io(path, err))?;
    serde_json::from_slice(&line)
        .map_err(|err| StoreError::corrupt(path, format!("unreadable header: {err}")))
}

fn indexed_key(
    path: &Path,
    tier: Tier,
    header: EntryHeader,
) -> Result<(CacheKey, EntryMeta), StoreError> {
    let key: CacheKey = header
        .key
        .parse()
        .map_err(|err| StoreError::corrupt(path, format!("{err}")))?;
    let expected = path.file_stem().and_then(|stem| stem.to_str());
    if key.tier() != tier || expected != Some(key.digest()) {
        return Err(StoreError::corrupt(path, "header key does not match file location"));
    }
    Ok((key, header.meta))
}

fn split_entry<'a>(path: &Path, raw: &'a [u8]) -> Result<(EntryHeader, &'a [u8]), StoreError> {
    let newline = raw
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StoreError::corrupt(path, "missing header line"))?;
    let header: EntryHeader = serde_json::from_slice(&raw[..newline])
        .map_err(|err| StoreError::corrupt(path, format!("unreadable header: {err}")))?;
    let body = &raw[newline + 1..];
    if body.len() as u64 != header.meta.stored_len {
        return Err(StoreError::corrupt(
            path,
            format!(
                "payload is {} bytes, header records {}",
                body.len(),
                header.meta.stored_len
            ),
        ));
    }
    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::KeyIndex;
    use crate::domain::types::{ContentId, Variant};
    use crate::util::clock::ManualClock;

    const START: i64 = 1_700_000_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        config: Arc<ConfigCell>,
        store: EntryStore,
    }

    fn fixture(config: CacheConfig) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::from_unix(START));
        let config = Arc::new(ConfigCell::new(config));
        let store = EntryStore::open(dir.path(), Arc::clone(&config), clock.clone())
            .expect("open store");
        Fixture {
            _dir: dir,
            clock,
            config,
            store,
        }
    }

    fn key(id: u64) -> CacheKey {
        KeyIndex::derive_key(ContentId::new(id), &Variant::anonymous_desktop())
    }

    #[test]
    fn entries_expire_lazily() {
        let fx = fixture(CacheConfig::default());
        let key = key(1);
        fx.store
            .put(&key, b"<html>hello</html>", Duration::from_secs(60))
            .expect("put");

        fx.clock.advance(Duration::from_secs(30));
        let entry = fx.store.get(&key).expect("get").expect("fresh entry");
        assert_eq!(entry.payload.as_ref(), b"<html>hello</html>");
        assert!(!entry.compressed);

        fx.clock.advance(Duration::from_secs(60));
        assert!(fx.store.get(&key).expect("get").is_none());
        assert_eq!(fx.store.len(), 1, "expired entries stay until collected");
    }

    #[test]
    fn compressed_payloads_read_back_transparently() {
        let fx = fixture(CacheConfig {
            compression: true,
            ..Default::default()
        });
        let key = key(2);
        let body = "<p>repeat</p>".repeat(200);
        let stored = fx
            .store
            .put(&key, body.as_bytes(), Duration::from_secs(60))
            .expect("put");
        assert!(stored.compressed);

        let on_disk = fs::metadata(fx.store.entry_path(&key)).expect("metadata").len();
        assert!(on_disk < body.len() as u64);

        let entry = fx.store.get(&key).expect("get").expect("entry");
        assert_eq!(entry.payload.as_ref(), body.as_bytes());
    }

    #[test]
    fn put_overwrites_previous_entry() {
        let fx = fixture(CacheConfig::default());
        let key = key(3);
        fx.store.put(&key, b"old", Duration::from_secs(60)).expect("put");
        fx.store.put(&key, b"new", Duration::from_secs(60)).expect("put");

        let entry = fx.store.get(&key).expect("get").expect("entry");
        assert_eq!(entry.payload.as_ref(), b"new");
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let fx = fixture(CacheConfig::default());
        let key = key(4);
        fx.store.put(&key, b"x", Duration::from_secs(60)).expect("put");

        assert!(fx.store.delete(&key).expect("first delete"));
        assert!(!fx.store.delete(&key).expect("second delete"));
        assert!(fx.store.get(&key).expect("get").is_none());
        assert!(!fx.store.entry_path(&key).exists());
        assert!(fx.store.is_empty());
    }

    #[test]
    fn scan_expired_rechecks_each_key() {
        let fx = fixture(CacheConfig::default());
        let short = key(5);
        let long = key(6);
        fx.store.put(&short, b"s", Duration::from_secs(10)).expect("put");
        fx.store.put(&long, b"l", Duration::from_secs(1000)).expect("put");
        fx.clock.advance(Duration::from_secs(20));

        let mut scan = fx.store.scan_expired(fx.clock.now());
        // Refreshed after the scan began: must not be reported.
        fx.store.put(&short, b"s2", Duration::from_secs(1000)).expect("refresh");
        assert_eq!(scan.next(), None);

        fx.clock.advance(Duration::from_secs(2000));
        let expired: Vec<_> = fx.store.scan_expired(fx.clock.now()).collect();
        assert_eq!(expired.len(), 2);
    }

    #[test]
    fn reopening_rebuilds_the_index() {
        let fx = fixture(CacheConfig {
            compression: true,
            ..Default::default()
        });
        let dynamic = key(7);
        let static_key = dynamic.in_tier(Tier::Static);
        fx.store.put(&dynamic, b"d", Duration::from_secs(60)).expect("put");
        fx.store.put(&static_key, b"s", Duration::from_secs(60)).expect("put");

        let stray = fx.store.root().join("static").join("zz");
        fs::create_dir_all(&stray).expect("mkdir");
        fs::write(stray.join("garbage.entry"), b"not json\n").expect("write stray");

        let reopened =
            EntryStore::open(fx.store.root(), Arc::clone(&fx.config), fx.clock.clone())
                .expect("reopen");
        assert_eq!(reopened.len(), 2);
        let entry = reopened.get(&static_key).expect("get").expect("entry");
        assert_eq!(entry.payload.as_ref(), b"s");
    }

    #[test]
    fn tier_counts_split_cached_and_expired() {
        let fx = fixture(CacheConfig::default());
        fx.store.put(&key(8), b"a", Duration::from_secs(10)).expect("put");
        fx.store.put(&key(9), b"b", Duration::from_secs(100)).expect("put");
        fx.store
            .put(&key(9).in_tier(Tier::Static), b"c", Duration::from_secs(100))
            .expect("put");
        fx.clock.advance(Duration::from_secs(50));

        let now = fx.clock.now();
        assert_eq!(
            fx.store.tier_counts(Tier::Dynamic, now),
            TierCounts {
                cached: 1,
                expired: 1
            }
        );
        assert_eq!(
            fx.store.tier_counts(Tier::Static, now),
            TierCounts {
                cached: 1,
                expired: 0
            }
        );
    }

    #[test]
    fn out_of_range_ttl_is_rejected() {
        let fx = fixture(CacheConfig::default());
        let err = fx
            .store
            .put(&key(11), b"x", Duration::from_secs(u64::MAX))
            .expect_err("ttl overflows the calendar");
        assert!(matches!(err, StoreError::TtlOutOfRange { ttl_secs: u64::MAX, .. }));
        assert!(fx.store.is_empty());
        assert!(!fx.store.entry_path(&key(11)).exists());
    }

    #[test]
    fn conditional_delete_spares_refreshed_entries() {
        let fx = fixture(CacheConfig::default());
        let key = key(12);
        fx.store.put(&key, b"old", Duration::from_secs(10)).expect("put");
        fx.clock.advance(Duration::from_secs(20));
        let scanned_at = fx.clock.now();

        fx.store.put(&key, b"new", Duration::from_secs(600)).expect("refresh");
        assert!(!fx.store.delete_if_expired(&key, scanned_at).expect("delete"));
        assert!(fx.store.get(&key).expect("get").is_some());

        fx.clock.advance(Duration::from_secs(1000));
        assert!(fx.store.delete_if_expired(&key, fx.clock.now()).expect("delete"));
        assert!(fx.store.is_empty());
    }

    #[test]
    fn emptied_slots_do_not_count_and_are_pruned_by_scans() {
        let fx = fixture(CacheConfig::default());
        let key = key(13);
        fx.store.put(&key, b"x", Duration::from_secs(10)).expect("put");

        let held = fx.store.slot(&key).expect("slot");
        assert!(fx.store.delete(&key).expect("delete"));
        assert_eq!(fx.store.len(), 0);
        assert!(fx.store.is_empty());
        assert_eq!(fx.store.slots.len(), 1, "slot still held by a reader");

        drop(held);
        assert_eq!(fx.store.scan_expired(fx.clock.now()).count(), 0);
        assert_eq!(fx.store.slots.len(), 0);
    }

    #[test]
    fn stores_sharing_a_directory_see_each_others_changes() {
        let fx = fixture(CacheConfig::default());
        let other = EntryStore::open(fx.store.root(), Arc::clone(&fx.config), fx.clock.clone())
            .expect("open second store");
        let shared = key(14).in_tier(Tier::Static);
        fx.store.put(&shared, b"page", Duration::from_secs(600)).expect("put");
        assert!(!other.is_fresh(&key(15)));

        // Written after `other` opened: visible to freshness checks and resync.
        assert!(other.is_fresh(&shared));
        let late = key(16);
        fx.store.put(&late, b"late", Duration::from_secs(600)).expect("put");
        other.resync().expect("resync");
        assert_eq!(other.len(), 2);

        assert_eq!(other.clear().expect("clear"), 2);
        assert!(!fx.store.is_fresh(&shared));
        assert!(fx.store.get(&late).expect("get").is_none());
        fx.store.resync().expect("resync");
        assert!(fx.store.is_empty());
        assert_eq!(
            fx.store.tier_counts(Tier::Static, fx.clock.now()),
            TierCounts::default()
        );
    }

    #[test]
    fn keys_for_finds_every_indexed_variant() {
        let fx = fixture(CacheConfig::default());
        let first = key(17);
        fx.store.put(&first, b"a", Duration::from_secs(60)).expect("put");
        fx.store
            .put(&first.in_tier(Tier::Static), b"a", Duration::from_secs(60))
            .expect("put");
        fx.store.put(&key(18), b"b", Duration::from_secs(60)).expect("put");

        let mut keys = fx.store.keys_for(ContentId::new(17));
        keys.sort();
        assert_eq!(keys, vec![first.clone(), first.in_tier(Tier::Static)]);
    }

    #[test]
    fn clear_empties_both_tiers() {
        let fx = fixture(CacheConfig::default());
        fx.store.put(&key(10), b"a", Duration::from_secs(10)).expect("put");
        fx.store
            .put(&key(10).in_tier(Tier::Static), b"b", Duration::from_secs(10))
            .expect("put");

        assert_eq!(fx.store.clear().expect("clear"), 2);
        assert!(fx.store.is_empty());
        assert_eq!(fx.store.clear().expect("clear again"), 0);
    }
}
