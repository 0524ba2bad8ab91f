//! Reforge: Dependency-Ordered Content Enhancement
//!
//! Automates multi-backend content enhancement over a project tree. Files are
//! scanned for textual references, leveled into a dependency-safe execution
//! order, enhanced concurrently by several generative backends, scored by a
//! meta-evaluation backend, and merged back with backup and patch-or-replace
//! semantics. A persisted scoreboard feeds outcomes back into future ordering.

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod scanner;
pub mod score;
pub mod state;
