//! # replaydb-commons
//!
//! Shared types, constants, and utilities for ReplayDB.
//!
//! This crate provides the foundational pieces used across all ReplayDB
//! crates (replaydb-core, replaydb-proto, replaydb-rpc, and the server
//! binary): typed identifier wrappers, the shared error enum, the server
//! configuration model, and system-wide constants. It carries no protocol or
//! storage logic to prevent circular dependencies.
//!
//! ## Example Usage
//!
//! ```rust
//! use replaydb_commons::{ReplayError, TableName};
//!
//! let table = TableName::new("experience");
//! let err = ReplayError::not_found(format!("Priority table {} was not found", table));
//! assert!(matches!(err, ReplayError::NotFound(_)));
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod models;

// Re-export commonly used types at crate root
pub use config::ServerConfig;
pub use errors::{ReplayError, Result};
pub use models::{ChunkKey, ItemKey, TableName};
