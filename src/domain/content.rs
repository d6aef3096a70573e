//! Seams to the host content system. The cache never renders or looks up
//! content itself; it asks these collaborators.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::error::ContentError;
use crate::domain::types::{ContentId, Variant};

/// Maps a normalized permalink path (leading and trailing slash, no host,
/// no query) to the content it addresses.
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> Result<Option<ContentId>, ContentError>;
}

/// Ordered listing of every cacheable content item.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn count(&self) -> Result<u64, ContentError>;

    /// Up to `limit` ids starting at position `offset` of the stable ordering.
    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<ContentId>, ContentError>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, content_id: ContentId, variant: &Variant)
    -> Result<Bytes, ContentError>;
}

/// Notification emitted by the host when content is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentChange {
    Created(ContentId),
    Updated(ContentId),
    Deleted(ContentId),
}

impl ContentChange {
    pub fn content_id(self) -> ContentId {
        match self {
            ContentChange::Created(id) | ContentChange::Updated(id) | ContentChange::Deleted(id) => {
                id
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentChange::Created(_) => "created",
            ContentChange::Updated(_) => "updated",
            ContentChange::Deleted(_) => "deleted",
        }
    }
}
