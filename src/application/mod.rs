//! Operator-facing application layer.

pub mod context;
pub mod controller;
pub mod error;
pub mod report;

pub use context::{CacheContext, ContentSources};
pub use controller::{
    CacheController, CacheStatus, DefaultsOutcome, FlushOutcome, FlushSelector, PreloadAction,
    PreloadOutcome, TrustedContext, enabled_message,
};
pub use error::{AppError, ControlError, ErrorReport};
pub use report::{Line, Report};
