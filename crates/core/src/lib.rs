//! Core types and shared functionality for metacrawl.
//!
//! This crate provides:
//! - Layered configuration
//! - Unified error types
//! - Keyed integrity hashing for cached data
//! - Cache stores (in-memory and SQLite) with verified reads
//! - SQLite persistence for indexed content, runs and the coordinate ledger

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod integrity;

pub use cache::{CacheEntry, CacheStore, MemoryStore, VerifiedCache};
pub use config::{AppConfig, ConfigError, IndexerConfig};
pub use db::{Coordinates, Db, IndexedContent, IndexingRun, RunStatus, SaveOutcome, StoredContent};
pub use error::Error;
pub use integrity::{IntegrityError, IntegrityHasher, KeyDerivation, SecretKeyGenerator};
