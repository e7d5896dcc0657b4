// src/models/request.rs
//! Credential request data model.
//!
//! A request is a recipient's ask to view a student's transcripts. It is
//! created `pending` and resolved exactly once, to `approved` or `denied`,
//! by the student it names.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a [`CredentialRequest`].
///
/// `Approved` and `Denied` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    /// Storage representation (matches the serde form).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// The caller's claimed relationship to a request.
///
/// Selects which wallet column must equal the caller's wallet in a lookup.
/// It is never derived from the record itself.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WalletRole {
    StudentWallet,
    RecipientWallet,
}

impl FromStr for WalletRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student_wallet" => Ok(Self::StudentWallet),
            "recipient_wallet" => Ok(Self::RecipientWallet),
            other => Err(format!("unknown wallet type: {other}")),
        }
    }
}

/// A recipient's request to view a student's transcripts.
///
/// # Invariants
/// - `transcript_list` is empty unless `status` is `Approved`
/// - `reason` is `None` unless `status` is `Denied`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialRequest {
    /// Generated at creation
    pub id: Uuid,
    /// Wallet that owns the transcripts and resolves the request
    pub student_wallet: String,
    /// Wallet asking for access
    pub recipient_wallet: String,
    pub status: RequestStatus,
    /// Ordered, de-duplicated transcript ids granted on approval
    pub transcript_list: Vec<String>,
    /// Optional explanation recorded on denial
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Absolute expiry. Advisory only: never changes `status`.
    pub expiry_timestamp: DateTime<Utc>,
}

impl CredentialRequest {
    /// Builds a new pending request expiring `expiry_minutes` after `now`.
    ///
    /// Returns `None` when the expiry cannot be represented as a timestamp.
    pub fn new_pending(
        student_wallet: String,
        recipient_wallet: String,
        now: DateTime<Utc>,
        expiry_minutes: i64,
    ) -> Option<Self> {
        let expiry_timestamp = TimeDelta::try_minutes(expiry_minutes)
            .and_then(|lifetime| now.checked_add_signed(lifetime))?;

        Some(Self {
            id: Uuid::new_v4(),
            student_wallet,
            recipient_wallet,
            status: RequestStatus::Pending,
            transcript_list: Vec::new(),
            reason: None,
            created_at: now,
            updated_at: now,
            expiry_timestamp,
        })
    }

    /// True when the wallet selected by `role` equals `wallet`.
    pub fn matches(&self, role: WalletRole, wallet: &str) -> bool {
        match role {
            WalletRole::StudentWallet => self.student_wallet == wallet,
            WalletRole::RecipientWallet => self.recipient_wallet == wallet,
        }
    }

    /// Approved and not yet past its expiry at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Approved && now < self.expiry_timestamp
    }
}

/// The outcome a student records on a pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Grants access to the listed transcripts
    Approve { transcript_ids: Vec<String> },
    /// Refuses access, optionally saying why
    Deny { reason: Option<String> },
}

impl Resolution {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Approve { .. } => RequestStatus::Approved,
            Self::Deny { .. } => RequestStatus::Denied,
        }
    }
}

/// A student's answer to a pending request, as sent over the API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseAction {
    Accept,
    Reject,
}

/// Link row recorded for every transcript granted by an approved request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestTranscript {
    pub request_id: Uuid,
    pub transcript_id: String,
}

/// Read shape of a request.
///
/// Always carries the identifying fields; `transcripts` only when approved
/// and `reason` only when denied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestView {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub student_wallet: String,
    pub recipient_wallet: String,
    pub expiry_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transcripts: Option<Vec<RequestTranscript>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl From<&CredentialRequest> for RequestView {
    fn from(request: &CredentialRequest) -> Self {
        let transcripts = (request.status == RequestStatus::Approved).then(|| {
            request
                .transcript_list
                .iter()
                .map(|transcript_id| RequestTranscript {
                    request_id: request.id,
                    transcript_id: transcript_id.clone(),
                })
                .collect()
        });
        let reason = match request.status {
            RequestStatus::Denied => Some(request.reason.clone().unwrap_or_default()),
            _ => None,
        };

        Self {
            request_id: request.id,
            status: request.status,
            student_wallet: request.student_wallet.clone(),
            recipient_wallet: request.recipient_wallet.clone(),
            expiry_timestamp: request.expiry_timestamp,
            transcripts,
            reason,
        }
    }
}
