// src/storage/mod.rs
//! Storage layer.
//!
//! Two kinds of state live outside the services:
//! - [`KeyStore`]: ephemeral, TTL-bound values (nonces and session tokens)
//! - [`RecordStore`]: durable requests, transcripts and their links
//!
//! Both are consumed as `Arc<dyn ...>` so the services never hold a
//! concrete backend.

pub mod ephemeral;
pub mod postgres;
pub mod records;

pub use ephemeral::{KeyStore, MemoryKeyStore};
pub use postgres::PgRecordStore;
pub use records::{MemoryRecordStore, RecordStore};

use thiserror::Error;

/// Failure reported by a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Connection, query or decoding failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}
