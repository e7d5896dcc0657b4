// src/storage/postgres.rs
//! Postgres-backed [`RecordStore`].
//!
//! All functions operate on the `requests`, `transcripts` and
//! `request_transcripts` tables created by the embedded migrations in
//! `migrations/`. Request resolution runs in a single transaction guarded by
//! `status = 'pending'`, so a losing concurrent resolution writes nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

use super::records::RecordStore;
use super::StoreError;
use crate::models::request::{
    CredentialRequest, RequestStatus, RequestTranscript, Resolution, WalletRole,
};
use crate::models::transcript::Transcript;

const REQUEST_COLUMNS: &str = "id, student_wallet, recipient_wallet, status, transcript_list, \
     reason, created_at, updated_at, expiry_timestamp";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Column holding the wallet selected by `role`.
fn wallet_column(role: WalletRole) -> &'static str {
    match role {
        WalletRole::StudentWallet => "student_wallet",
        WalletRole::RecipientWallet => "recipient_wallet",
    }
}

/// [`RecordStore`] over a Postgres connection pool.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `url` and applies the embedded migrations.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the connection or a migration fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("Database migrations applied");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_request(&self, request: &CredentialRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO requests (id, student_wallet, recipient_wallet, status, transcript_list,
             reason, created_at, updated_at, expiry_timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(request.id)
        .bind(&request.student_wallet)
        .bind(&request.recipient_wallet)
        .bind(request.status.as_str())
        .bind(&request.transcript_list)
        .bind(&request.reason)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.expiry_timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_request(
        &self,
        id: Uuid,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Option<CredentialRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE id = $1 AND {} = $2",
            wallet_column(role)
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id)
            .bind(wallet)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RequestRow::into_record).transpose()
    }

    async fn list_requests(
        &self,
        role: WalletRole,
        wallet: &str,
    ) -> Result<Vec<CredentialRequest>, StoreError> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests WHERE {} = $1 ORDER BY created_at",
            wallet_column(role)
        );
        let rows = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(wallet)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(RequestRow::into_record).collect()
    }

    async fn resolve_request(
        &self,
        id: Uuid,
        resolution: &Resolution,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<CredentialRequest>, StoreError> {
        let no_transcripts: Vec<String> = Vec::new();
        let (transcript_list, reason) = match resolution {
            Resolution::Approve { transcript_ids } => (transcript_ids, None),
            Resolution::Deny { reason } => (&no_transcripts, reason.as_deref()),
        };

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE requests SET status = $1, transcript_list = $2, reason = $3, updated_at = $4
             WHERE id = $5 AND status = $6
             RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(resolution.status().as_str())
            .bind(transcript_list)
            .bind(reason)
            .bind(updated_at)
            .bind(id)
            .bind(RequestStatus::Pending.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            // Dropping the transaction rolls it back.
            return Ok(None);
        };

        if let Resolution::Approve { transcript_ids } = resolution {
            sqlx::query("DELETE FROM request_transcripts WHERE request_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            for transcript_id in transcript_ids {
                sqlx::query(
                    "INSERT INTO request_transcripts (request_id, transcript_id) VALUES ($1, $2)",
                )
                .bind(id)
                .bind(transcript_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        row.into_record().map(Some)
    }

    async fn request_links(&self, request_id: Uuid) -> Result<Vec<RequestTranscript>, StoreError> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT request_id, transcript_id FROM request_transcripts WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| RequestTranscript {
                request_id: row.request_id,
                transcript_id: row.transcript_id,
            })
            .collect())
    }

    async fn insert_transcript(&self, transcript: &Transcript) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transcripts (transcript_id, ipfs_uri_metadata, ipfs_uri_media_hash, owner_wallet)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&transcript.transcript_id)
        .bind(&transcript.ipfs_uri_metadata)
        .bind(&transcript.ipfs_uri_media_hash)
        .bind(&transcript.owner_wallet)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_transcript(&self, transcript_id: &str) -> Result<Option<Transcript>, StoreError> {
        let row = sqlx::query_as::<_, TranscriptRow>(
            "SELECT transcript_id, ipfs_uri_metadata, ipfs_uri_media_hash, owner_wallet
             FROM transcripts WHERE transcript_id = $1",
        )
        .bind(transcript_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_transcript_by_uri(&self, uri: &str) -> Result<Option<Transcript>, StoreError> {
        let row = sqlx::query_as::<_, TranscriptRow>(
            "SELECT transcript_id, ipfs_uri_metadata, ipfs_uri_media_hash, owner_wallet
             FROM transcripts WHERE ipfs_uri_metadata = $1 OR ipfs_uri_media_hash = $1
             LIMIT 1",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn transcripts_owned_by(&self, owner: &str) -> Result<Vec<Transcript>, StoreError> {
        let rows = sqlx::query_as::<_, TranscriptRow>(
            "SELECT transcript_id, ipfs_uri_metadata, ipfs_uri_media_hash, owner_wallet
             FROM transcripts WHERE owner_wallet = $1",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transcripts_granted_to(&self, recipient: &str) -> Result<Vec<Transcript>, StoreError> {
        let rows = sqlx::query_as::<_, TranscriptRow>(
            "SELECT DISTINCT t.transcript_id, t.ipfs_uri_metadata, t.ipfs_uri_media_hash, t.owner_wallet
             FROM transcripts t
             JOIN request_transcripts rt ON rt.transcript_id = t.transcript_id
             JOIN requests r ON r.id = rt.request_id
             WHERE r.recipient_wallet = $1 AND r.status = $2",
        )
        .bind(recipient)
        .bind(RequestStatus::Approved.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn is_granted(&self, transcript_id: &str, recipient: &str) -> Result<bool, StoreError> {
        let granted: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM request_transcripts rt
                 JOIN requests r ON r.id = rt.request_id
                 WHERE rt.transcript_id = $1 AND r.recipient_wallet = $2 AND r.status = $3
             )",
        )
        .bind(transcript_id)
        .bind(recipient)
        .bind(RequestStatus::Approved.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(granted)
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    student_wallet: String,
    recipient_wallet: String,
    status: String,
    transcript_list: Vec<String>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expiry_timestamp: DateTime<Utc>,
}

impl RequestRow {
    fn into_record(self) -> Result<CredentialRequest, StoreError> {
        let status = self.status.parse::<RequestStatus>().map_err(|e| {
            warn!("request {} has an unreadable status: {}", self.id, e);
            StoreError::Backend(e)
        })?;

        Ok(CredentialRequest {
            id: self.id,
            student_wallet: self.student_wallet,
            recipient_wallet: self.recipient_wallet,
            status,
            transcript_list: self.transcript_list,
            reason: self.reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expiry_timestamp: self.expiry_timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TranscriptRow {
    transcript_id: String,
    ipfs_uri_metadata: String,
    ipfs_uri_media_hash: String,
    owner_wallet: String,
}

impl From<TranscriptRow> for Transcript {
    fn from(row: TranscriptRow) -> Self {
        Self {
            transcript_id: row.transcript_id,
            ipfs_uri_metadata: row.ipfs_uri_metadata,
            ipfs_uri_media_hash: row.ipfs_uri_media_hash,
            owner_wallet: row.owner_wallet,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    request_id: Uuid,
    transcript_id: String,
}
