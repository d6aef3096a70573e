#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use supercache::application::{CacheContext, ContentSources};
use supercache::domain::content::{ContentCatalog, IdentifierResolver, Renderer};
use supercache::domain::error::ContentError;
use supercache::domain::types::{ContentId, Variant};
use supercache::infra::state::{MemoryStateStore, Record, RecordLock, StateBackend, StateError};
use supercache::util::clock::{Clock, ManualClock};
use tempfile::TempDir;

pub const START: i64 = 1_700_000_000;

/// Content ids `0..total`, with `/post-<id>/` permalinks.
pub struct SiteContent {
    total: u64,
    permalinks: HashMap<String, ContentId>,
    pub renders: AtomicUsize,
}

impl SiteContent {
    pub fn new(total: u64) -> Self {
        let permalinks = (0..total)
            .map(|id| (format!("/post-{id}/"), ContentId::new(id)))
            .collect();
        Self {
            total,
            permalinks,
            renders: AtomicUsize::new(0),
        }
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentifierResolver for SiteContent {
    async fn resolve(&self, path: &str) -> Result<Option<ContentId>, ContentError> {
        Ok(self.permalinks.get(path).copied())
    }
}

#[async_trait]
impl ContentCatalog for SiteContent {
    async fn count(&self) -> Result<u64, ContentError> {
        Ok(self.total)
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ContentId>, ContentError> {
        let end = offset.saturating_add(limit).min(self.total);
        Ok((offset..end).map(ContentId::new).collect())
    }
}

#[async_trait]
impl Renderer for SiteContent {
    async fn render(&self, content_id: ContentId, variant: &Variant) -> Result<Bytes, ContentError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!(
            "<html data-variant=\"{}\">{content_id}</html>",
            variant.canonical()
        )))
    }
}

/// Accepts every write except switch updates, which it silently drops.
#[derive(Default)]
pub struct StuckSwitchBackend {
    inner: MemoryStateStore,
}

impl StateBackend for StuckSwitchBackend {
    fn read(&self, record: Record) -> Result<Option<String>, StateError> {
        self.inner.read(record)
    }

    fn write(&self, record: Record, contents: &str) -> Result<(), StateError> {
        if record == Record::Switch {
            return Ok(());
        }
        self.inner.write(record, contents)
    }

    fn lock(&self, record: Record) -> Result<RecordLock<'_>, StateError> {
        self.inner.lock(record)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub content: Arc<SiteContent>,
    pub context: CacheContext,
}

pub fn harness(total: u64) -> Harness {
    harness_with_backend(total, Arc::new(MemoryStateStore::new()))
}

pub fn harness_with_backend(total: u64, backend: Arc<dyn StateBackend>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::from_unix(START));
    let content = Arc::new(SiteContent::new(total));
    let context = context_in(dir.path(), backend, &content, &clock);
    Harness {
        dir,
        clock,
        content,
        context,
    }
}

/// A context over `cache_dir`, as a separate process sharing the directory
/// would build it.
pub fn context_in(
    cache_dir: &Path,
    backend: Arc<dyn StateBackend>,
    content: &Arc<SiteContent>,
    clock: &Arc<ManualClock>,
) -> CacheContext {
    CacheContext::build(
        cache_dir,
        backend,
        ContentSources::from_shared(Arc::clone(content)),
        Arc::clone(clock) as Arc<dyn Clock>,
        100,
    )
    .expect("context builds")
}
