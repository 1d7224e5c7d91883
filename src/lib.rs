//! Bulk folder-sharing engine: a resumable, bounded-concurrency worker
//! pool that grants read permissions to recipients matched against a
//! preloaded folder map, idempotent across runs via a history file and
//! the remote document's own status column.
//!
//! Module layout mirrors the teacher's thin `pub mod` re-export surface
//! (`continuum-core/src/lib.rs`).

pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod matcher;
pub mod models;
pub mod pool;
pub mod remote_client;

pub use config::Config;
pub use engine::{Engine, RunOutcome};
pub use error::EngineError;
