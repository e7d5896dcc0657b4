// src/error.rs
//! Error taxonomy for the transcript access service.
//!
//! Every validation and business-rule failure is raised as an [`ApiError`]
//! at the point of detection and propagated with `?`. The single
//! [`IntoResponse`] implementation below is the only place that turns an
//! error kind into an HTTP status and JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::storage::StoreError;

/// Errors surfaced to callers of the service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// A required header (wallet identity, signature or session) is missing.
    #[error("Insufficient headers")]
    InsufficientHeaders,

    /// A required body field is missing or the body could not be parsed.
    #[error("Insufficient data")]
    InsufficientData,

    /// A field was present but its value is not acceptable.
    #[error("Invalid data")]
    InvalidData,

    /// The wallet role selector is neither `student_wallet` nor `recipient_wallet`.
    #[error("Invalid input. Ensure 'wallet_type' is either 'student_wallet' or 'recipient_wallet'")]
    InvalidWalletType,

    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    #[error("Invalid signature length")]
    InvalidSignatureLength,

    #[error("Invalid signature recovery id")]
    InvalidRecoveryId,

    #[error("Error recovering public key")]
    PublicKeyRecoveryFailed,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid or expired session")]
    InvalidSessionToken,

    /// No outstanding nonce for the wallet: never issued, expired or already consumed.
    #[error("Nonce not found")]
    NonceNotFound,

    /// Also covers "exists but the caller is not a party to it".
    #[error("Request not found")]
    RequestNotFound,

    #[error("Request is not in a pending state")]
    RequestNotPending,

    #[error("Unauthorized to access this transcript")]
    UnauthorizedTranscript,

    #[error("Transcript already registered")]
    TranscriptConflict,

    /// Storage or other infrastructure failure. The detail is logged, never returned.
    #[error("Internal server error")]
    InternalServer(String),
}

impl ApiError {
    /// HTTP status code for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InsufficientHeaders
            | Self::InsufficientData
            | Self::InvalidData
            | Self::InvalidWalletType
            | Self::InvalidSignatureFormat
            | Self::InvalidSignatureLength
            | Self::InvalidRecoveryId => StatusCode::BAD_REQUEST,
            Self::PublicKeyRecoveryFailed => StatusCode::FAILED_DEPENDENCY,
            Self::InvalidSignature
            | Self::InvalidSessionToken
            | Self::NonceNotFound
            | Self::UnauthorizedTranscript => StatusCode::UNAUTHORIZED,
            Self::RequestNotFound => StatusCode::NOT_FOUND,
            Self::RequestNotPending | Self::TranscriptConflict => StatusCode::CONFLICT,
            Self::InternalServer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => Self::TranscriptConflict,
            StoreError::Backend(detail) => Self::InternalServer(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::InternalServer(detail) = &self {
            error!("internal server error: {}", detail);
        }

        let body = json!({
            "error": self.to_string(),
            "status_code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
