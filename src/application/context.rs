//! Wiring of the cache components around one store and one state backend.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::controller::CacheController;
use crate::cache::{
    ConfigCell, EntryStore, GarbageCollector, InvalidationEngine, KeyIndex, Preloader,
    StatsCollector,
};
use crate::config::Settings;
use crate::domain::content::{ContentCatalog, IdentifierResolver, Renderer};
use crate::infra::{
    catalog::ManifestCatalog,
    error::InfraError,
    scheduler::Scheduler,
    state::{FileStateStore, StateBackend, StateStore},
};
use crate::util::clock::{Clock, SystemClock};

/// The host collaborators the cache depends on.
#[derive(Clone)]
pub struct ContentSources {
    pub resolver: Arc<dyn IdentifierResolver>,
    pub catalog: Arc<dyn ContentCatalog>,
    pub renderer: Arc<dyn Renderer>,
}

impl ContentSources {
    /// Uses one value for all three roles.
    pub fn from_shared<T>(source: Arc<T>) -> Self
    where
        T: IdentifierResolver + ContentCatalog + Renderer + 'static,
    {
        Self {
            resolver: source.clone(),
            catalog: source.clone(),
            renderer: source,
        }
    }
}

pub struct CacheContext {
    pub config: Arc<ConfigCell>,
    pub states: StateStore,
    pub store: Arc<EntryStore>,
    pub invalidation: Arc<InvalidationEngine>,
    pub gc: Arc<GarbageCollector>,
    pub preloader: Arc<Preloader>,
    pub stats: Arc<StatsCollector>,
    pub controller: CacheController,
}

impl CacheContext {
    /// Builds every component. The cache configuration is read from the
    /// state backend; without a record the built-in defaults apply.
    pub fn build(
        cache_dir: &Path,
        backend: Arc<dyn StateBackend>,
        content: ContentSources,
        clock: Arc<dyn Clock>,
        gc_batch_size: usize,
    ) -> Result<Self, InfraError> {
        let states = StateStore::new(backend);
        let config = Arc::new(ConfigCell::new(states.load_config()?.unwrap_or_default()));
        let store = Arc::new(EntryStore::open(
            cache_dir,
            Arc::clone(&config),
            Arc::clone(&clock),
        )?);
        debug!(
            cache_dir = %cache_dir.display(),
            entries = store.len(),
            "Entry store opened"
        );

        let invalidation = Arc::new(InvalidationEngine::new(
            Arc::clone(&store),
            Arc::clone(&config),
        ));
        let gc = Arc::new(
            GarbageCollector::new(Arc::clone(&store), Arc::clone(&config), Arc::clone(&clock))
                .with_batch_size(gc_batch_size),
        );
        let preloader = Arc::new(Preloader::new(
            Arc::clone(&store),
            Arc::clone(&config),
            states.clone(),
            content.catalog,
            content.renderer,
            Arc::clone(&clock),
        ));
        let stats = Arc::new(StatsCollector::new(
            Arc::clone(&store),
            states.clone(),
            clock,
        ));
        let controller = CacheController::new(
            KeyIndex::new(content.resolver),
            Arc::clone(&invalidation),
            Arc::clone(&preloader),
            Arc::clone(&stats),
            Arc::clone(&config),
            states.clone(),
        );

        Ok(Self {
            config,
            states,
            store,
            invalidation,
            gc,
            preloader,
            stats,
            controller,
        })
    }

    /// Builds the context described by deployment settings: file-backed
    /// state and the configured content manifest.
    pub async fn from_settings(settings: &Settings) -> Result<Self, InfraError> {
        let backend = Arc::new(FileStateStore::open(&settings.storage.state_dir)?);
        let catalog = match settings.content.manifest.as_deref() {
            Some(path) => ManifestCatalog::load(path).await?,
            None => ManifestCatalog::empty(),
        };

        Self::build(
            &settings.storage.cache_dir,
            backend,
            ContentSources::from_shared(Arc::new(catalog)),
            Arc::new(SystemClock),
            settings.scheduler.gc_batch_size.get(),
        )
    }

    pub fn scheduler(&self, settings: &Settings) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.gc),
            Arc::clone(&self.preloader),
            Arc::clone(&self.stats),
            Arc::clone(&self.config),
            self.states.clone(),
            &settings.scheduler,
        )
    }
}
