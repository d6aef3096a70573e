//! Invalidation engine.
//!
//! Turns content changes into deletions of every cached variant of the
//! affected content, in both tiers.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::ConfigCell;
use super::keys::KeyIndex;
use super::store::{EntryStore, StoreError};
use crate::domain::content::ContentChange;
use crate::domain::types::ContentId;

/// Purges cache entries for changed content.
///
/// # Usage
///
/// ```ignore
/// // After a post is saved:
/// invalidation.content_updated(post_id)?;
/// ```
pub struct InvalidationEngine {
    store: Arc<EntryStore>,
    config: Arc<ConfigCell>,
}

impl InvalidationEngine {
    pub fn new(store: Arc<EntryStore>, config: Arc<ConfigCell>) -> Self {
        Self { store, config }
    }

    /// Deletes every variant of `content_id` and returns how many entries
    /// were removed. Content that was never cached yields `Ok(0)`.
    ///
    /// The purge set covers the variants the current configuration produces
    /// and every stored key of the content, so copies cached for a mobile
    /// group that has since been removed are purged too.
    ///
    /// A failing key does not stop the remaining deletions; the first error
    /// is returned once all keys have been attempted.
    pub fn invalidate(&self, content_id: ContentId) -> Result<usize, StoreError> {
        let mut keys: BTreeSet<_> = self
            .config
            .read(|config| KeyIndex::variant_keys(content_id, config))
            .into_iter()
            .collect();
        keys.extend(self.store.keys_for(content_id));

        let mut removed = 0;
        let mut first_error = None;
        for key in &keys {
            match self.store.delete(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(content_id = %content_id, key = %key, error = %err, "Cache delete failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        debug!(content_id = %content_id, keys = keys.len(), removed, "Content invalidated");
        Ok(removed)
    }

    /// Deletes every entry in both tiers.
    pub fn invalidate_all(&self) -> Result<usize, StoreError> {
        let removed = self.store.clear()?;
        info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Entry point for host change notifications.
    pub fn on_content_changed(&self, change: ContentChange) -> Result<usize, StoreError> {
        debug!(change = change.as_str(), content_id = %change.content_id(), "Content change received");
        self.invalidate(change.content_id())
    }

    pub fn content_created(&self, content_id: ContentId) -> Result<usize, StoreError> {
        self.on_content_changed(ContentChange::Created(content_id))
    }

    pub fn content_updated(&self, content_id: ContentId) -> Result<usize, StoreError> {
        self.on_content_changed(ContentChange::Updated(content_id))
    }

    pub fn content_deleted(&self, content_id: ContentId) -> Result<usize, StoreError> {
        self.on_content_changed(ContentChange::Deleted(content_id))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::config::{CacheConfig, MobileConfig};
    use crate::cache::keys::Tier;
    use crate::domain::types::{Device, Variant, Visitor};
    use crate::util::clock::ManualClock;

    fn engine(config: CacheConfig) -> (tempfile::TempDir, Arc<EntryStore>, InvalidationEngine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(ConfigCell::new(config));
        let clock = Arc::new(ManualClock::from_unix(1_700_000_000));
        let store = Arc::new(
            EntryStore::open(dir.path(), Arc::clone(&config), clock).expect("open store"),
        );
        let engine = InvalidationEngine::new(Arc::clone(&store), config);
        (dir, store, engine)
    }

    fn cache_every_variant(store: &EntryStore, config: &CacheConfig, id: ContentId) {
        for variant in KeyIndex::variants(config) {
            let key = KeyIndex::derive_key(id, &variant);
            store.put(&key, b"page", Duration::from_secs(60)).expect("put");
            if variant.is_anonymous() {
                store
                    .put(&key.in_tier(Tier::Static), b"page", Duration::from_secs(60))
                    .expect("put static");
            }
        }
    }

    #[test]
    fn invalidate_removes_every_variant_and_spares_others() {
        let config = CacheConfig {
            mobile: MobileConfig {
                enabled: true,
                groups: vec!["tablet".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let (_dir, store, engine) = engine(config.clone());
        cache_every_variant(&store, &config, ContentId::new(1));
        cache_every_variant(&store, &config, ContentId::new(2));

        assert_eq!(engine.invalidate(ContentId::new(1)).expect("invalidate"), 9);
        for key in KeyIndex::variant_keys(ContentId::new(1), &config) {
            assert!(store.get(&key).expect("get").is_none());
        }

        let survivor = KeyIndex::derive_key(ContentId::new(2), &Variant::anonymous_desktop());
        assert!(store.get(&survivor).expect("get").is_some());
    }

    #[test]
    fn invalidate_reaches_variants_of_removed_mobile_groups() {
        let config = CacheConfig {
            mobile: MobileConfig {
                enabled: true,
                groups: vec!["tablet".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let (_dir, store, engine) = engine(CacheConfig::default());
        let id = ContentId::new(7);
        cache_every_variant(&store, &config, id);
        let tablet = KeyIndex::derive_key(
            id,
            &Variant::new(Device::MobileGroup("tablet".into()), Visitor::Anonymous),
        );
        assert!(store.get(&tablet).expect("get").is_some());

        // The engine runs with the group already dropped from the config.
        assert_eq!(engine.invalidate(id).expect("invalidate"), 9);
        assert!(store.get(&tablet).expect("get").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn cold_content_invalidates_nothing() {
        let (_dir, _store, engine) = engine(CacheConfig::default());
        assert_eq!(engine.content_updated(ContentId::new(404)).expect("invalidate"), 0);
    }

    #[test]
    fn invalidate_all_clears_both_tiers() {
        let config = CacheConfig::default();
        let (_dir, store, engine) = engine(config.clone());
        cache_every_variant(&store, &config, ContentId::new(3));

        assert_eq!(engine.invalidate_all().expect("clear"), 3);
        assert!(store.is_empty());
    }
}
