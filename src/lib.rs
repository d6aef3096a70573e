//! Disk-backed page cache with keyed invalidation, timed garbage collection,
//! and a resumable static-tier preloader.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
