// src/services/transcript_registry.rs
//! Transcript Registry Service
//!
//! Registers students' transcripts so they can later be granted to
//! recipients. A transcript is identified by its id and points to content
//! stored on IPFS through two URIs:
//! - Metadata URI: the descriptive document for the transcript
//! - Media URI: the transcript file itself
//!
//! Registration is the only write; records are never updated or removed.

use log::{info, warn};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::transcript::Transcript;
use crate::storage::RecordStore;
use crate::utils::crypto::{normalize_wallet, require_wallet};

/// Service for registering transcripts on behalf of their owners
#[derive(Clone)]
pub struct TranscriptRegistry {
    /// Durable store shared with the request and access services
    records: Arc<dyn RecordStore>,
}

impl TranscriptRegistry {
    /// Creates a new TranscriptRegistry over `records`
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Registers a transcript owned by the calling wallet
    ///
    /// # Arguments
    /// * `transcript` - Record to store; its `owner_wallet` is normalised
    /// * `caller_wallet` - Wallet verified for this call
    ///
    /// # Returns
    /// The stored record
    ///
    /// # Errors
    /// - `InsufficientData` if any field is empty
    /// - `InvalidData` if `owner_wallet` is not an address
    /// - `UnauthorizedTranscript` if `owner_wallet` is not the caller
    /// - `TranscriptConflict` if the id or either URI is already registered
    pub async fn register(
        &self,
        transcript: Transcript,
        caller_wallet: &str,
    ) -> Result<Transcript, ApiError> {
        let transcript = Transcript {
            transcript_id: transcript.transcript_id.trim().to_string(),
            ipfs_uri_metadata: transcript.ipfs_uri_metadata.trim().to_string(),
            ipfs_uri_media_hash: transcript.ipfs_uri_media_hash.trim().to_string(),
            owner_wallet: transcript.owner_wallet.trim().to_string(),
        };
        if transcript.transcript_id.is_empty()
            || transcript.ipfs_uri_metadata.is_empty()
            || transcript.ipfs_uri_media_hash.is_empty()
            || transcript.owner_wallet.is_empty()
        {
            return Err(ApiError::InsufficientData);
        }

        let owner = normalize_wallet(&transcript.owner_wallet).ok_or(ApiError::InvalidData)?;
        let transcript = Transcript {
            owner_wallet: owner,
            ..transcript
        };
        let caller = require_wallet(caller_wallet, ApiError::InsufficientData)?;
        if transcript.owner_wallet != caller {
            warn!(
                "{} tried to register transcript {} for {}",
                caller, transcript.transcript_id, transcript.owner_wallet
            );
            return Err(ApiError::UnauthorizedTranscript);
        }

        if self
            .records
            .find_transcript(&transcript.transcript_id)
            .await?
            .is_some()
        {
            return Err(ApiError::TranscriptConflict);
        }
        for uri in [&transcript.ipfs_uri_metadata, &transcript.ipfs_uri_media_hash] {
            if self.records.find_transcript_by_uri(uri).await?.is_some() {
                return Err(ApiError::TranscriptConflict);
            }
        }

        // The store enforces uniqueness again for concurrent registrations.
        self.records.insert_transcript(&transcript).await?;
        info!(
            "registered transcript {} for {}",
            transcript.transcript_id, transcript.owner_wallet
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStore;

    const OWNER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn registry() -> TranscriptRegistry {
        TranscriptRegistry::new(Arc::new(MemoryRecordStore::new()))
    }

    fn transcript(id: &str, meta: &str, media: &str) -> Transcript {
        Transcript {
            transcript_id: id.into(),
            ipfs_uri_metadata: meta.into(),
            ipfs_uri_media_hash: media.into(),
            owner_wallet: OWNER.into(),
        }
    }

    #[tokio::test]
    async fn registers_for_caller() {
        let registry = registry();
        let mut record = transcript("T1", "ipfs://m1", "ipfs://f1");
        record.owner_wallet = OWNER.to_uppercase();

        let stored = registry.register(record, OWNER).await.unwrap();
        assert_eq!(stored.owner_wallet, OWNER);
    }

    #[tokio::test]
    async fn bare_owner_address_is_the_same_wallet() {
        let mut record = transcript("T1", "ipfs://m1", "ipfs://f1");
        record.owner_wallet = OWNER.trim_start_matches("0x").into();

        let stored = registry().register(record, OWNER).await.unwrap();
        assert_eq!(stored.owner_wallet, OWNER);
    }

    #[tokio::test]
    async fn rejects_non_address_owner() {
        let mut record = transcript("T1", "ipfs://m1", "ipfs://f1");
        record.owner_wallet = "0xaaaa".into();
        assert_eq!(
            registry().register(record, OWNER).await,
            Err(ApiError::InvalidData)
        );
    }

    #[tokio::test]
    async fn rejects_empty_fields() {
        assert_eq!(
            registry()
                .register(transcript("T1", "", "ipfs://f1"), OWNER)
                .await,
            Err(ApiError::InsufficientData)
        );
    }

    #[tokio::test]
    async fn rejects_registration_for_another_wallet() {
        assert_eq!(
            registry()
                .register(
                    transcript("T1", "ipfs://m1", "ipfs://f1"),
                    "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
                )
                .await,
            Err(ApiError::UnauthorizedTranscript)
        );
    }

    #[tokio::test]
    async fn duplicate_id_or_uri_conflicts() {
        let registry = registry();
        registry
            .register(transcript("T1", "ipfs://m1", "ipfs://f1"), OWNER)
            .await
            .unwrap();

        for duplicate in [
            transcript("T1", "ipfs://m2", "ipfs://f2"),
            transcript("T2", "ipfs://m1", "ipfs://f2"),
            transcript("T3", "ipfs://m3", "ipfs://f1"),
            transcript("T4", "ipfs://f1", "ipfs://m4"),
        ] {
            assert_eq!(
                registry.register(duplicate, OWNER).await,
                Err(ApiError::TranscriptConflict)
            );
        }
    }
}
