// src/storage/records.rs
//! Durable record storage for requests, transcripts and request↔transcript links.
//!
//! Provides the [`RecordStore`] contract used by the services and an
//! in-memory implementation suitable for development and tests. The
//! Postgres implementation lives in [`super::postgres`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;
use crate::models::request::{
    CredentialRequest, RequestStatus, RequestTranscript, Resolution, WalletRole,
};
use crate::models::transcript::Transcript;

/// Durable store of requests, transcripts and approval links.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a newly created request.
    async fn insert_request(&self, request: &CredentialRequest) -> Result<(), StoreError>;

    /// Looks up a request by id whose `role` column equals `wallet`.
    async fn find_request(
        &self,
        id: Uuid,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Option<CredentialRequest>, StoreError>;

    /// All requests whose `role` column equals `wallet`, oldest first.
    async fn list_requests(
        &self,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Vec<CredentialRequest>, StoreError>;

    /// Moves a pending request to its terminal state in one atomic write.
    ///
    /// For an approval the link rows are deleted and re-inserted alongside the
    /// status change. Returns `None` without writing anything if the request
    /// is no longer pending.
    async fn resolve_request(
        &self,
        id: Uuid,
        resolution: &Resolution,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<CredentialRequest>, StoreError>;

    /// Link rows written for a request on approval.
    async fn request_links(&self, request_id: Uuid) -> Result<Vec<RequestTranscript>, StoreError>;

    /// Persists a new transcript. Fails with [`StoreError::Conflict`] on a duplicate id or URI.
    async fn insert_transcript(&self, transcript: &Transcript) -> Result<(), StoreError>;

    async fn find_transcript(&self, transcript_id: &str) -> Result<Option<Transcript>, StoreError>;

    /// Transcript whose metadata URI or media URI equals `uri` exactly.
    async fn find_transcript_by_uri(&self, uri: &str) -> Result<Option<Transcript>, StoreError>;

    async fn transcripts_owned_by(&self, owner: &str) -> Result<Vec<Transcript>, StoreError>;

    /// Transcripts linked to any approved request whose recipient is `recipient`.
    async fn transcripts_granted_to(&self, recipient: &str) -> Result<Vec<Transcript>, StoreError>;

    /// Whether an approved request for `recipient` links `transcript_id`.
    async fn is_granted(&self, transcript_id: &str, recipient: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct Tables {
    requests: HashMap<Uuid, CredentialRequest>,
    transcripts: HashMap<String, Transcript>,
    links: Vec<RequestTranscript>,
}

impl Tables {
    fn approved_for(&self, recipient: &str) -> HashSet<Uuid> {
        self.requests
            .values()
            .filter(|r| r.status == RequestStatus::Approved && r.recipient_wallet == recipient)
            .map(|r| r.id)
            .collect()
    }
}

/// In-memory [`RecordStore`].
///
/// A single `RwLock` guards all three tables, so every write (including a
/// request resolution with its link rows) is atomic.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_request(&self, request: &CredentialRequest) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("request {} exists", request.id)));
        }
        tables.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn find_request(
        &self,
        id: Uuid,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Option<CredentialRequest>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .get(&id)
            .filter(|r| r.matches(role, wallet))
            .cloned())
    }

    async fn list_requests(
        &self,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Vec<CredentialRequest>, StoreError> {
        let tables = self.tables.read().await;
        let mut requests: Vec<_> = tables
            .requests
            .values()
            .filter(|r| r.matches(role, wallet))
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn resolve_request(
        &self,
        id: Uuid,
        resolution: &Resolution,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<CredentialRequest>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(request) = tables.requests.get_mut(&id) else {
            return Ok(None);
        };
        if request.status != RequestStatus::Pending {
            return Ok(None);
        }

        request.status = resolution.status();
        request.updated_at = updated_at;
        match resolution {
            Resolution::Approve { transcript_ids } => {
                request.transcript_list = transcript_ids.clone();
            }
            Resolution::Deny { reason } => {
                request.reason = reason.clone();
            }
        }
        let resolved = request.clone();

        if let Resolution::Approve { transcript_ids } = resolution {
            tables.links.retain(|link| link.request_id != id);
            tables
                .links
                .extend(transcript_ids.iter().map(|transcript_id| RequestTranscript {
                    request_id: id,
                    transcript_id: transcript_id.clone(),
                }));
        }
        Ok(Some(resolved))
    }

    async fn request_links(&self, request_id: Uuid) -> Result<Vec<RequestTranscript>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .links
            .iter()
            .filter(|link| link.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn insert_transcript(&self, transcript: &Transcript) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .transcripts
            .values()
            .any(|existing| transcript.collides_with(existing))
        {
            return Err(StoreError::Conflict(format!(
                "transcript {} collides with an existing record",
                transcript.transcript_id
            )));
        }
        tables
            .transcripts
            .insert(transcript.transcript_id.clone(), transcript.clone());
        Ok(())
    }

    async fn find_transcript(&self, transcript_id: &str) -> Result<Option<Transcript>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.transcripts.get(transcript_id).cloned())
    }

    async fn find_transcript_by_uri(&self, uri: &str) -> Result<Option<Transcript>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.transcripts.values().find(|t| t.has_uri(uri)).cloned())
    }

    async fn transcripts_owned_by(&self, owner: &str) -> Result<Vec<Transcript>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transcripts
            .values()
            .filter(|t| t.owner_wallet == owner)
            .cloned()
            .collect())
    }

    async fn transcripts_granted_to(&self, recipient: &str) -> Result<Vec<Transcript>, StoreError> {
        let tables = self.tables.read().await;
        let approved = tables.approved_for(recipient);
        let granted: HashSet<&str> = tables
            .links
            .iter()
            .filter(|link| approved.contains(&link.request_id))
            .map(|link| link.transcript_id.as_str())
            .collect();
        Ok(granted
            .into_iter()
            .filter_map(|id| tables.transcripts.get(id).cloned())
            .collect())
    }

    async fn is_granted(&self, transcript_id: &str, recipient: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        let approved = tables.approved_for(recipient);
        Ok(tables
            .links
            .iter()
            .any(|link| link.transcript_id == transcript_id && approved.contains(&link.request_id)))
    }
}
