//! File-backed content catalog.
//!
//! A manifest lists the published content items so the binary can resolve
//! permalinks, enumerate content for preloading, and render pages without a
//! host CMS:
//!
//! ```toml
//! [[content]]
//! id = 1
//! permalink = "/hello-world/"
//! source = "pages/hello-world.html"
//! ```
//!
//! `source` paths are relative to the manifest. An item may carry an inline
//! `body` instead.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::InfraError;
use crate::cache::normalize_permalink;
use crate::domain::content::{ContentCatalog, IdentifierResolver, Renderer};
use crate::domain::error::ContentError;
use crate::domain::types::{ContentId, Variant};

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    content: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    id: ContentId,
    permalink: String,
    #[serde(default)]
    source: Option<PathBuf>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Clone)]
enum Body {
    File(PathBuf),
    Inline(Bytes),
}

#[derive(Debug, Default)]
pub struct ManifestCatalog {
    items: BTreeMap<ContentId, Body>,
    permalinks: HashMap<String, ContentId>,
}

impl ManifestCatalog {
    /// A catalog with no content; nothing resolves and preloads are empty.
    pub fn empty() -> Self {
        Self::default()
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let catalog = Self::parse(&raw, base)?;
        debug!(
            manifest = %path.display(),
            items = catalog.items.len(),
            "Content manifest loaded"
        );
        Ok(catalog)
    }

    pub fn parse(raw: &str, base: &Path) -> Result<Self, InfraError> {
        let manifest: Manifest = toml::from_str(raw)
            .map_err(|err| InfraError::configuration(format!("invalid content manifest: {err}")))?;

        let mut catalog = Self::default();
        for item in manifest.content {
            let body = match (item.source, item.body) {
                (Some(source), None) => Body::File(base.join(source)),
                (None, Some(body)) => Body::Inline(Bytes::from(body)),
                _ => {
                    return Err(InfraError::configuration(format!(
                        "content {} must set exactly one of `source` or `body`",
                        item.id
                    )));
                }
            };
            let Some(permalink) = normalize_permalink(&item.permalink) else {
                return Err(InfraError::configuration(format!(
                    "content {} has an invalid permalink `{}`",
                    item.id, item.permalink
                )));
            };
            if catalog.items.insert(item.id, body).is_some() {
                return Err(InfraError::configuration(format!(
                    "content {} is listed more than once",
                    item.id
                )));
            }
            if let Some(previous) = catalog.permalinks.insert(permalink.clone(), item.id) {
                warn!(
                    permalink,
                    previous = %previous,
                    content_id = %item.id,
                    "Permalink listed twice; the later item wins"
                );
            }
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl IdentifierResolver for ManifestCatalog {
    async fn resolve(&self, path: &str) -> Result<Option<ContentId>, ContentError> {
        Ok(self.permalinks.get(path).copied())
    }
}

#[async_trait]
impl ContentCatalog for ManifestCatalog {
    async fn count(&self) -> Result<u64, ContentError> {
        Ok(self.items.len() as u64)
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ContentId>, ContentError> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self.items.keys().copied().skip(skip).take(take).collect())
    }
}

#[async_trait]
impl Renderer for ManifestCatalog {
    async fn render(&self, content_id: ContentId, _variant: &Variant) -> Result<Bytes, ContentError> {
        match self.items.get(&content_id) {
            None => Err(ContentError::Missing(content_id)),
            Some(Body::Inline(body)) => Ok(body.clone()),
            Some(Body::File(path)) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|err| {
                    ContentError::render(content_id, format!("{}: {err}", path.display()))
                }),
        }
    }
}
