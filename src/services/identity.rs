// src/services/identity.rs
//! Caller identity middleware.
//!
//! Every protected route runs [`verify_caller`] first. The caller names its
//! wallet in `Wallet-Address` and proves control of it with either:
//! - `Session-Token`: a token from an earlier successful authentication, or
//! - `Signature`: a `personal_sign` signature over the wallet's current nonce.
//!
//! A signature opens a new session whose token is returned in the
//! `Session-Token` response header. Handlers read the proven wallet from the
//! [`VerifiedWallet`] request extension.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use log::warn;

use crate::error::ApiError;
use crate::services::authenticator::Authenticator;
use crate::utils::crypto::require_wallet;

pub const WALLET_ADDRESS_HEADER: HeaderName = HeaderName::from_static("wallet-address");
pub const SESSION_TOKEN_HEADER: HeaderName = HeaderName::from_static("session-token");
pub const SIGNATURE_HEADER: HeaderName = HeaderName::from_static("signature");

/// Normalised wallet address proven for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedWallet(pub String);

/// Non-empty header value as a string, ignoring values that are not visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Rejects the request unless the caller proves control of `Wallet-Address`.
///
/// A `Wallet-Address` that is not a 20-byte hex address is `InvalidData`.
///
/// A supplied session token takes precedence: if it is invalid the request
/// fails with `InvalidSessionToken` even when a signature is also present.
pub async fn verify_caller(
    State(authenticator): State<Authenticator>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let wallet = header_str(headers, &WALLET_ADDRESS_HEADER)
        .ok_or(ApiError::InsufficientHeaders)
        .and_then(|raw| require_wallet(raw, ApiError::InsufficientHeaders))?;

    let mut issued_token = None;
    if let Some(token) = header_str(headers, &SESSION_TOKEN_HEADER) {
        if !authenticator.validate_session(&wallet, token).await? {
            warn!("rejected session token for {}", wallet);
            return Err(ApiError::InvalidSessionToken);
        }
    } else if let Some(signature) = header_str(headers, &SIGNATURE_HEADER) {
        issued_token = Some(authenticator.authenticate(&wallet, signature).await?);
    } else {
        return Err(ApiError::InsufficientHeaders);
    }

    request.extensions_mut().insert(VerifiedWallet(wallet));
    let mut response = next.run(request).await;

    if let Some(token) = issued_token {
        let value = HeaderValue::from_str(&token)
            .map_err(|err| ApiError::InternalServer(err.to_string()))?;
        response.headers_mut().insert(SESSION_TOKEN_HEADER, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyStore;
    use crate::wallet::key_management::KeyManager;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn authenticator() -> Authenticator {
        Authenticator::new(
            Arc::new(MemoryKeyStore::new()),
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
    }

    fn app(authenticator: Authenticator) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(VerifiedWallet(wallet)): Extension<VerifiedWallet>| async move {
                    wallet
                }),
            )
            .layer(middleware::from_fn_with_state(authenticator, verify_caller))
    }

    fn whoami(headers: &[(&HeaderName, &str)]) -> Request {
        let mut builder = Request::builder().uri("/whoami");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_wallet_is_rejected() {
        let response = app(authenticator()).oneshot(whoami(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wallet_without_proof_is_rejected() {
        let wallet = KeyManager::new();
        let response = app(authenticator())
            .oneshot(whoami(&[(&WALLET_ADDRESS_HEADER, wallet.address())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_wallet_is_rejected() {
        let response = app(authenticator())
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, "0xabc"),
                (&SESSION_TOKEN_HEADER, "token"),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signature_without_nonce_is_unauthorized() {
        let wallet = KeyManager::new();
        let signature = wallet.sign_personal_message("never issued").unwrap();
        let response = app(authenticator())
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, wallet.address()),
                (&SIGNATURE_HEADER, signature.as_str()),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signature_from_other_key_is_unauthorized() {
        let auth = authenticator();
        let wallet = KeyManager::new();
        let nonce = auth.issue_nonce(wallet.address()).await.unwrap();
        let forged = KeyManager::new().sign_personal_message(&nonce).unwrap();

        let response = app(auth)
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, wallet.address()),
                (&SIGNATURE_HEADER, forged.as_str()),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signature_opens_session_and_token_is_reusable() {
        let auth = authenticator();
        let wallet = KeyManager::new();
        let nonce = auth.issue_nonce(wallet.address()).await.unwrap();
        let signature = wallet.sign_personal_message(&nonce).unwrap();

        let response = app(auth.clone())
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, wallet.address()),
                (&SIGNATURE_HEADER, signature.as_str()),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let token = response.headers()[SESSION_TOKEN_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, wallet.address().as_bytes());

        let response = app(auth)
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, wallet.address()),
                (&SESSION_TOKEN_HEADER, token.as_str()),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn bad_session_token_wins_over_signature() {
        let auth = authenticator();
        let wallet = KeyManager::new();
        let nonce = auth.issue_nonce(wallet.address()).await.unwrap();
        let signature = wallet.sign_personal_message(&nonce).unwrap();

        let response = app(auth)
            .oneshot(whoami(&[
                (&WALLET_ADDRESS_HEADER, wallet.address()),
                (&SESSION_TOKEN_HEADER, "stale"),
                (&SIGNATURE_HEADER, signature.as_str()),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn replayed_signature_is_rejected() {
        let auth = authenticator();
        let wallet = KeyManager::new();
        let nonce = auth.issue_nonce(wallet.address()).await.unwrap();
        let signature = wallet.sign_personal_message(&nonce).unwrap();
        let headers = [
            (&WALLET_ADDRESS_HEADER, wallet.address()),
            (&SIGNATURE_HEADER, signature.as_str()),
        ];

        let first = app(auth.clone()).oneshot(whoami(&headers)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app(auth).oneshot(whoami(&headers)).await.unwrap();
        assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    }
}
