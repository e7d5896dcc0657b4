// src/storage/ephemeral.rs
//! Ephemeral keyed storage with per-entry expiry.
//!
//! Holds authentication nonces (keyed by wallet) and session tokens (keyed by
//! `session:<wallet>`). Expired entries behave exactly like missing ones.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::StoreError;

/// TTL-capable key/value store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Returns the live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes `key`. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes `key` only if its live value equals `expected`.
    ///
    /// The comparison and the removal happen as one atomic step, so among
    /// concurrent callers passing the same `expected` at most one gets `true`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process [`KeyStore`] backed by a mutex-guarded map.
///
/// Expiry is checked on every read; stale entries are swept on writes.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
