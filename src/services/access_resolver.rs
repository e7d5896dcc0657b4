// src/services/access_resolver.rs
//! Transcript visibility.
//!
//! A wallet can see a transcript when it owns it, or when it is the recipient
//! of an approved request that links it. Expiry does not revoke access.

use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::transcript::Transcript;
use crate::storage::RecordStore;
use crate::utils::crypto::require_wallet;

/// Read-only access checks over the record store.
#[derive(Clone)]
pub struct AccessResolver {
    records: Arc<dyn RecordStore>,
}

impl AccessResolver {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Owned transcripts followed by granted ones, each id listed once.
    pub async fn list_accessible_transcripts(
        &self,
        wallet: &str,
    ) -> Result<Vec<Transcript>, ApiError> {
        let wallet = require_wallet(wallet, ApiError::InsufficientData)?;
        let mut owned = self.records.transcripts_owned_by(&wallet).await?;
        owned.sort_by(|a, b| a.transcript_id.cmp(&b.transcript_id));
        let mut granted = self.records.transcripts_granted_to(&wallet).await?;
        granted.sort_by(|a, b| a.transcript_id.cmp(&b.transcript_id));

        let mut seen = HashSet::new();
        Ok(owned
            .into_iter()
            .chain(granted)
            .filter(|t| seen.insert(t.transcript_id.clone()))
            .collect())
    }

    /// Whether `wallet` may open the transcript stored at `uri`.
    ///
    /// `uri` must equal either the metadata or the media URI exactly. An
    /// unknown URI is simply not accessible.
    pub async fn check_access(&self, wallet: &str, uri: &str) -> Result<bool, ApiError> {
        let wallet = require_wallet(wallet, ApiError::InsufficientData)?;
        let Some(transcript) = self.records.find_transcript_by_uri(uri.trim()).await? else {
            debug!("no transcript registered at {}", uri);
            return Ok(false);
        };

        if transcript.owner_wallet == wallet {
            return Ok(true);
        }
        Ok(self
            .records
            .is_granted(&transcript.transcript_id, &wallet)
            .await?)
    }
}
