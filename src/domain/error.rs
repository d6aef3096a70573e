use thiserror::Error;

use crate::domain::types::ContentId;

/// Failure reported by an external content collaborator (catalog, resolver,
/// or renderer).
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content `{0}` does not exist")]
    Missing(ContentId),
    #[error("content source unavailable: {message}")]
    Unavailable { message: String },
    #[error("rendering content `{content_id}` failed: {message}")]
    Render {
        content_id: ContentId,
        message: String,
    },
}

impl ContentError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn render(content_id: ContentId, message: impl Into<String>) -> Self {
        Self::Render {
            content_id,
            message: message.into(),
        }
    }
}
