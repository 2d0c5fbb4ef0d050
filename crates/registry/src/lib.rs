//! Per-process entity cache and lookup engine.
//!
//! # Purpose
//!
//! Answer "which classes match this name?" about a stopped target process
//! while spending as few expensive evaluations as possible. Class metadata is
//! enumerated once per process run in windows of handles, published as an
//! immutable [`Generation`], and then served from memory.
//!
//! # Key types
//!
//! | Type | Meaning | Constructed in |
//! |---|---|---|
//! | [`Engine`] | Entry point over one [`objscope_channel::AccessChannel`] | [`Engine::new`] |
//! | [`Session`] | Published generation and enumeration slot of one process | [`SessionTable::get_or_create`] |
//! | [`Generation`] | Immutable snapshot indexed by handle and name | [`Session::enumerate`] |
//! | [`EnumerationReport`] | What the pass that built a generation achieved | [`Engine::reload`] |
//! | [`EngineConfig`] | Batch size, timeouts and walk bounds | [`EngineConfig::from_toml_str`] |
//!
//! # Lifecycle
//!
//! 1. First lookup for a process identity creates its session (Empty).
//! 2. A wildcard lookup, reload or cold downstream query enumerates and
//!    publishes generation 1 (Populated).
//! 3. Reloads publish `n + 1`; clears return to Empty.
//! 4. A relaunch yields a new identity and therefore a fresh session; the
//!    stale one is evicted.
//!
//! # Concurrency
//!
//! The engine is `Sync` when its channel is. Readers never lock; at most one
//! enumeration runs per session and concurrent callers join it.

mod config;
mod engine;
mod error;
mod fast_path;
mod generation;
mod hierarchy;
mod members;
mod method;
mod resolver;
mod session;
mod table;

pub use config::{ConfigError, DEFAULT_BATCH_SIZE, EngineConfig};
pub use engine::{Engine, LookupOptions};
pub use error::{EngineError, Result};
pub use generation::{Entity, EnumerationReport, Generation, Matches};
pub use hierarchy::walk;
pub use method::MethodTarget;
pub use objscope_matcher::MatchMode;
pub use session::Session;
pub use table::SessionTable;
