// src/services/api_server.rs
//! API Server for the transcript access service
//!
//! This module provides the REST API through which students and recipients
//! authenticate with their wallets, exchange credential requests and open
//! transcripts.
//!
//! The API is built using Axum and includes endpoints for:
//! - Wallet authentication (nonce challenge and signature verification)
//! - Credential request creation, resolution and lookup
//! - Transcript registration, listing and access checks
//!
//! Every `/v1` route except the two authentication endpoints sits behind
//! [`verify_caller`], which proves the caller's wallet before the handler runs.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Router,
};
use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::request::{RequestView, ResponseAction, WalletRole};
use crate::models::transcript::Transcript;
use crate::services::access_resolver::AccessResolver;
use crate::services::authenticator::Authenticator;
use crate::services::identity::{
    header_str, verify_caller, VerifiedWallet, SESSION_TOKEN_HEADER, WALLET_ADDRESS_HEADER,
};
use crate::services::request_manager::RequestManager;
use crate::services::transcript_registry::TranscriptRegistry;
use crate::storage::{KeyStore, RecordStore};
use crate::utils::config::Settings;
use crate::utils::crypto::normalize_wallet;

// API request and response structures

/// Request payload for exchanging a signed nonce for a session token
#[derive(Serialize, Deserialize)]
struct VerifyNonceRequest {
    wallet_address: Option<String>,
    signature: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct VerifyNonceResponse {
    session_token: String,
}

#[derive(Serialize, Deserialize)]
struct NonceResponse {
    nonce: String,
}

/// Request payload for asking a student for transcripts
#[derive(Serialize, Deserialize)]
struct CreateRequestBody {
    student_wallet: Option<String>,
    /// Must be the caller when present
    recipient_wallet: Option<String>,
    expiry_minutes: Option<i64>,
}

/// Request payload for a student's answer to a pending request
#[derive(Serialize, Deserialize)]
struct RespondBody {
    response: Option<ResponseAction>,
    transcript_list: Option<Vec<String>>,
    reason: Option<String>,
}

/// Request payload for registering a transcript
#[derive(Serialize, Deserialize)]
struct RegisterTranscriptBody {
    transcript_id: Option<String>,
    ipfs_uri_metadata: Option<String>,
    ipfs_uri_media_hash: Option<String>,
    owner_wallet: Option<String>,
}

/// Query selecting the caller's role, and optionally only active approvals
#[derive(Deserialize)]
struct RoleQuery {
    wallet_type: Option<String>,
    active: Option<bool>,
}

impl RoleQuery {
    fn role(&self) -> Result<WalletRole, ApiError> {
        self.wallet_type
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|_| ApiError::InvalidWalletType)
    }
}

#[derive(Serialize, Deserialize)]
struct RequestListResponse {
    requests: Vec<RequestView>,
}

#[derive(Serialize, Deserialize)]
struct TranscriptListResponse {
    transcripts: Vec<Transcript>,
}

/// Unwraps a JSON body, mapping malformed payloads to `InsufficientData`
/// and well-formed payloads with unacceptable values to `InvalidData`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::JsonDataError(err)) => {
            debug!("rejected request body: {}", err);
            Err(ApiError::InvalidData)
        }
        Err(err) => {
            debug!("unreadable request body: {}", err);
            Err(ApiError::InsufficientData)
        }
    }
}

fn required(field: Option<String>) -> Result<String, ApiError> {
    field
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::InsufficientData)
}

/// A request id that is not a UUID cannot name an existing request.
fn request_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id).map_err(|err| {
        debug!("unparseable request id: {}", err);
        ApiError::RequestNotFound
    })
}

fn role_query(query: Result<Query<RoleQuery>, QueryRejection>) -> Result<RoleQuery, ApiError> {
    query.map(|Query(q)| q).map_err(|err| {
        debug!("rejected query string: {}", err);
        ApiError::InvalidData
    })
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    /// Nonce challenges and session tokens
    authenticator: Authenticator,

    /// Credential request lifecycle
    requests: RequestManager,

    /// Transcript visibility checks
    access: AccessResolver,

    /// Transcript registration
    transcripts: TranscriptRegistry,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `keys` - Ephemeral store for nonces and session tokens
    /// * `records` - Durable store for requests, transcripts and grants
    /// * `settings` - Lifetimes applied to nonces, sessions and requests
    pub fn new(keys: Arc<dyn KeyStore>, records: Arc<dyn RecordStore>, settings: &Settings) -> Self {
        ApiServer {
            authenticator: Authenticator::new(keys, settings.nonce_ttl(), settings.session_ttl()),
            requests: RequestManager::new(records.clone())
                .with_default_expiry(settings.default_expiry_minutes),
            access: AccessResolver::new(records.clone()),
            transcripts: TranscriptRegistry::new(records),
        }
    }

    /// Builds the application router with all routes, the identity
    /// middleware and CORS applied.
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/v1/requests/create", post(Self::create_request_handler))
            .route("/v1/requests/:request_id/respond", post(Self::respond_handler))
            .route("/v1/requests/:request_id", get(Self::get_request_handler))
            .route("/v1/requests", get(Self::list_requests_handler))
            .route(
                "/v1/transcripts",
                post(Self::register_transcript_handler).get(Self::list_transcripts_handler),
            )
            .route("/v1/transcripts/access/*ipfs_uri", get(Self::check_access_handler))
            .route_layer(middleware::from_fn_with_state(
                self.authenticator.clone(),
                verify_caller,
            ));

        // Browsers may only read the refreshed token if it is exposed.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([SESSION_TOKEN_HEADER]);

        Router::new()
            .route("/health", get(Self::health_handler))
            .route("/v1/auth/generate-nonce", get(Self::generate_nonce_handler))
            .route("/v1/auth/verify-nonce", post(Self::verify_nonce_handler))
            .merge(protected)
            .layer(cors)
            .with_state(Arc::new(self.clone()))
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    pub async fn run(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("API server listening on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .context("API server terminated")
    }

    async fn health_handler() -> impl IntoResponse {
        Json(json!({ "status": "ok" }))
    }

    // =====================
    // Authentication Handlers
    // =====================

    /// Issues an authentication challenge for the wallet
    ///
    /// # Endpoint
    /// GET /v1/auth/generate-nonce
    ///
    /// # Headers
    /// `Wallet-Address` - wallet that will sign the nonce
    ///
    /// # Responses
    /// - 200 OK: Returns the nonce to sign
    /// - 400 Bad Request: Missing wallet header
    async fn generate_nonce_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
    ) -> Result<Json<NonceResponse>, ApiError> {
        let wallet =
            header_str(&headers, &WALLET_ADDRESS_HEADER).ok_or(ApiError::InsufficientHeaders)?;
        let nonce = state.authenticator.issue_nonce(wallet).await?;
        Ok(Json(NonceResponse { nonce }))
    }

    /// Exchanges a signed nonce for a session token
    ///
    /// # Endpoint
    /// POST /v1/auth/verify-nonce
    ///
    /// # Responses
    /// - 200 OK: Returns the session token
    /// - 400 Bad Request: Missing wallet or signature
    /// - 401 Unauthorized: Bad signature, or no outstanding nonce
    async fn verify_nonce_handler(
        State(state): State<Arc<ApiServer>>,
        payload: Result<Json<VerifyNonceRequest>, JsonRejection>,
    ) -> Result<Json<VerifyNonceResponse>, ApiError> {
        let body = json_body(payload)?;
        let wallet = body.wallet_address.unwrap_or_default();
        let signature = body.signature.unwrap_or_default();

        let session_token = state.authenticator.authenticate(&wallet, &signature).await?;
        Ok(Json(VerifyNonceResponse { session_token }))
    }

    // =====================
    // Credential Request Handlers
    // =====================

    /// Opens a request from the caller to a student
    ///
    /// # Endpoint
    /// POST /v1/requests/create
    ///
    /// # Responses
    /// - 201 Created: Returns the new request
    /// - 400 Bad Request: Missing student, recipient other than the caller, or bad expiry
    async fn create_request_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        payload: Result<Json<CreateRequestBody>, JsonRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let body = json_body(payload)?;
        let student = required(body.student_wallet)?;
        if let Some(recipient) = body.recipient_wallet {
            if normalize_wallet(&recipient).as_deref() != Some(caller.as_str()) {
                return Err(ApiError::InvalidData);
            }
        }

        let request = state
            .requests
            .create(&student, &caller, body.expiry_minutes)
            .await?;
        Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "Request created",
                "request_id": request.id,
                "request": RequestView::from(&request),
            })),
        ))
    }

    /// Records the student's answer to a pending request
    ///
    /// # Endpoint
    /// POST /v1/requests/:request_id/respond
    ///
    /// # Request Body
    /// `{"response": "accept", "transcript_list": [...]}` or
    /// `{"response": "reject", "reason": "..."}`
    ///
    /// # Responses
    /// - 200 OK: Request resolved
    /// - 401 Unauthorized: A listed transcript is not the caller's
    /// - 404 Not Found: No such request for this student
    /// - 409 Conflict: Request already resolved
    async fn respond_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        path: Result<Path<Uuid>, PathRejection>,
        payload: Result<Json<RespondBody>, JsonRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let id = request_id(path)?;
        let body = json_body(payload)?;
        let response = body.response.ok_or(ApiError::InsufficientData)?;

        let resolved = state
            .requests
            .respond(id, &caller, response, body.transcript_list, body.reason)
            .await?;
        Ok(Json(json!({
            "message": format!("Request {}", resolved.status),
        })))
    }

    /// Reads one request the caller is party to
    ///
    /// # Endpoint
    /// GET /v1/requests/:request_id?wallet_type=student_wallet|recipient_wallet
    async fn get_request_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        path: Result<Path<Uuid>, PathRejection>,
        query: Result<Query<RoleQuery>, QueryRejection>,
    ) -> Result<Json<RequestView>, ApiError> {
        let id = request_id(path)?;
        let role = role_query(query)?.role()?;
        Ok(Json(state.requests.get(id, &caller, role).await?))
    }

    /// Lists the caller's requests in the given role
    ///
    /// # Endpoint
    /// GET /v1/requests?wallet_type=...&active=true
    ///
    /// With `active=true` only approved, unexpired requests are returned.
    async fn list_requests_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        query: Result<Query<RoleQuery>, QueryRejection>,
    ) -> Result<Json<RequestListResponse>, ApiError> {
        let query = role_query(query)?;
        let role = query.role()?;

        let requests = if query.active.unwrap_or(false) {
            state.requests.list_active(&caller, role).await?
        } else {
            state.requests.list(&caller, role).await?
        };
        Ok(Json(RequestListResponse { requests }))
    }

    // =====================
    // Transcript Handlers
    // =====================

    /// Registers a transcript owned by the caller
    ///
    /// # Endpoint
    /// POST /v1/transcripts
    ///
    /// # Responses
    /// - 201 Created: Returns the stored transcript
    /// - 401 Unauthorized: `owner_wallet` is not the caller
    /// - 409 Conflict: Id or URI already registered
    async fn register_transcript_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        payload: Result<Json<RegisterTranscriptBody>, JsonRejection>,
    ) -> Result<impl IntoResponse, ApiError> {
        let body = json_body(payload)?;
        let transcript = Transcript {
            transcript_id: required(body.transcript_id)?,
            ipfs_uri_metadata: required(body.ipfs_uri_metadata)?,
            ipfs_uri_media_hash: required(body.ipfs_uri_media_hash)?,
            owner_wallet: required(body.owner_wallet)?,
        };

        let transcript = state.transcripts.register(transcript, &caller).await?;
        Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "Transcript registered",
                "transcript": transcript,
            })),
        ))
    }

    /// Lists every transcript the caller owns or has been granted
    ///
    /// # Endpoint
    /// GET /v1/transcripts
    async fn list_transcripts_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
    ) -> Result<Json<TranscriptListResponse>, ApiError> {
        let transcripts = state.access.list_accessible_transcripts(&caller).await?;
        Ok(Json(TranscriptListResponse { transcripts }))
    }

    /// Answers whether the caller may open the content at an IPFS URI
    ///
    /// # Endpoint
    /// GET /v1/transcripts/access/*ipfs_uri
    ///
    /// # Responses
    /// - 200 OK: Access granted
    /// - 403 Forbidden: Access denied, including for unknown URIs
    async fn check_access_handler(
        State(state): State<Arc<ApiServer>>,
        Extension(VerifiedWallet(caller)): Extension<VerifiedWallet>,
        Path(ipfs_uri): Path<String>,
    ) -> Result<impl IntoResponse, ApiError> {
        let uri = ipfs_uri.trim_start_matches('/');
        if state.access.check_access(&caller, uri).await? {
            Ok((StatusCode::OK, Json(json!({ "message": "Access granted" }))))
        } else {
            Ok((StatusCode::FORBIDDEN, Json(json!({ "message": "Access denied" }))))
        }
    }
}
