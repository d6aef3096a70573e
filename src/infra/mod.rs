//! Infrastructure adapters and runtime bootstrap.

pub mod catalog;
pub mod error;
pub mod scheduler;
pub mod state;
pub mod telemetry;
