use std::error::Error as StdError;

use thiserror::Error;

use crate::cache::{DisabledReason, PreloadError, StoreError};
use crate::config::LoadError;
use crate::domain::error::ContentError;
use crate::infra::{error::InfraError, state::StateError};

/// Failure chain of an error, flattened for logging.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// The innermost cause, when it adds something to the top-level message.
    pub fn root_cause(&self) -> Option<&str> {
        match self.messages.as_slice() {
            [_, .., last] => Some(last.as_str()),
            _ => None,
        }
    }
}

/// Operator-facing failure of a [`CacheController`](super::CacheController)
/// operation. Every variant renders as exactly one message.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("This is not a valid post id or permalink: `{0}`.")]
    InvalidSelector(String),
    #[error("There is no post with this permalink.")]
    NotFound,
    #[error("No cache stats found.")]
    NoStats,
    #[error("The cache stats are too old to work with (older than 24 hours).")]
    StaleStats,
    #[error("{}", disabled_message(.0))]
    Disabled(DisabledReason),
    #[error("Cache preloading is already in progress.")]
    AlreadyRunning,
    #[error(
        "There is already a pending preload cancel. It may take up to a minute for it to cancel completely."
    )]
    AlreadyCancelling,
    #[error("Not currently preloading.")]
    NotRunning,
    #[error("{}", not_confirmed_message(.expected))]
    NotConfirmed { expected: bool },
    #[error("Cache storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("Control state unavailable: {0}")]
    State(#[from] StateError),
    #[error("Content lookup failed: {0}")]
    Content(#[from] ContentError),
}

fn disabled_message(reason: &DisabledReason) -> &'static str {
    match reason {
        DisabledReason::Cache => "The page cache is not enabled.",
        DisabledReason::Preload => "Cache preloading is not enabled.",
    }
}

fn not_confirmed_message(expected: &bool) -> &'static str {
    if *expected {
        "The page cache is not enabled, check its settings for more info."
    } else {
        "The page cache is still enabled, check its settings for more info."
    }
}

impl ControlError {
    pub fn invalid_selector(input: impl Into<String>) -> Self {
        Self::InvalidSelector(input.into())
    }

    /// Process exit status reported by the operator binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            ControlError::InvalidSelector(_) => 2,
            ControlError::NotFound => 3,
            ControlError::NoStats => 4,
            ControlError::StaleStats => 5,
            ControlError::Disabled(_) => 6,
            ControlError::AlreadyRunning => 7,
            ControlError::AlreadyCancelling => 8,
            ControlError::NotRunning => 9,
            ControlError::NotConfirmed { .. } => 10,
            ControlError::Store(_) => 11,
            ControlError::State(_) => 12,
            ControlError::Content(_) => 13,
        }
    }
}

impl From<PreloadError> for ControlError {
    fn from(error: PreloadError) -> Self {
        match error {
            PreloadError::Disabled(reason) => ControlError::Disabled(reason),
            PreloadError::AlreadyRunning => ControlError::AlreadyRunning,
            PreloadError::AlreadyCancelling => ControlError::AlreadyCancelling,
            PreloadError::NotRunning => ControlError::NotRunning,
            PreloadError::State(err) => ControlError::State(err),
            PreloadError::Catalog(err) => ControlError::Content(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] LoadError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Control(err) => err.exit_code(),
            AppError::Configuration(_) => 78,
            AppError::Infra(_) | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
