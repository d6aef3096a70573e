//! Domain vocabulary shared by the cache core and its collaborators.

pub mod content;
pub mod error;
pub mod types;
