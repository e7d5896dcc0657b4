// src/services/authenticator.rs
//! Wallet challenge-response authentication and session management.
//!
//! Per wallet there are two independent lifecycles:
//! - Challenge: `NoChallenge -> NonceIssued -> (Consumed | Expired)`
//! - Session: `NoSession -> SessionActive -> (Expired | Superseded)`
//!
//! A nonce authenticates at most once. Consumption goes through
//! [`KeyStore::delete_if_eq`], so a replayed or concurrent second attempt
//! with the same nonce fails with `NonceNotFound`.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::KeyStore;
use crate::utils::crypto::{random_hex_token, require_wallet};
use crate::wallet::signature;

/// Session tokens are 128 random bits.
const SESSION_TOKEN_BYTES: usize = 16;

/// `wallet` must already be a canonical address, which can never contain `:`.
fn session_key(wallet: &str) -> String {
    format!("session:{wallet}")
}

/// Issues nonces and session tokens backed by a [`KeyStore`].
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn KeyStore>,
    nonce_ttl: Duration,
    session_ttl: Duration,
}

impl Authenticator {
    pub fn new(store: Arc<dyn KeyStore>, nonce_ttl: Duration, session_ttl: Duration) -> Self {
        Self {
            store,
            nonce_ttl,
            session_ttl,
        }
    }

    /// Issues a fresh challenge for `wallet`, replacing any outstanding one.
    ///
    /// # Errors
    /// - `InsufficientHeaders` if `wallet` is empty
    /// - `InvalidData` if `wallet` is not an address
    /// - `InternalServer` if the store write fails
    pub async fn issue_nonce(&self, wallet: &str) -> Result<String, ApiError> {
        let wallet = require_wallet(wallet, ApiError::InsufficientHeaders)?;

        let nonce = Uuid::new_v4().to_string();
        self.store.set(&wallet, &nonce, self.nonce_ttl).await?;
        debug!("issued nonce for {}", wallet);
        Ok(nonce)
    }

    /// Verifies `signature_hex` over the outstanding nonce and opens a session.
    ///
    /// # Process Flow
    /// 1. Fetch the stored nonce (`NonceNotFound` if absent or expired)
    /// 2. Verify the signature with the nonce as message (`InvalidSignature` on failure)
    /// 3. Consume the nonce atomically (`NonceNotFound` if another call got there first)
    /// 4. Store and return a new session token, superseding any previous one
    pub async fn authenticate(&self, wallet: &str, signature_hex: &str) -> Result<String, ApiError> {
        let wallet = require_wallet(wallet, ApiError::InsufficientHeaders)?;
        if signature_hex.trim().is_empty() {
            return Err(ApiError::InsufficientHeaders);
        }

        let nonce = self
            .store
            .get(&wallet)
            .await?
            .ok_or(ApiError::NonceNotFound)?;

        match signature::verify(&nonce, signature_hex, &wallet) {
            Ok(true) => {}
            Ok(false) => {
                warn!("signature from {} does not match the wallet", wallet);
                return Err(ApiError::InvalidSignature);
            }
            Err(err) => {
                warn!("signature from {} rejected: {}", wallet, err);
                return Err(ApiError::InvalidSignature);
            }
        }

        if !self.store.delete_if_eq(&wallet, &nonce).await? {
            warn!("nonce for {} was consumed concurrently", wallet);
            return Err(ApiError::NonceNotFound);
        }

        let token = random_hex_token(SESSION_TOKEN_BYTES);
        self.store
            .set(&session_key(&wallet), &token, self.session_ttl)
            .await?;
        info!("opened session for {}", wallet);
        Ok(token)
    }

    /// Checks `token` against the wallet's active session. Never mutates state.
    pub async fn validate_session(&self, wallet: &str, token: &str) -> Result<bool, ApiError> {
        let wallet = require_wallet(wallet, ApiError::InsufficientHeaders)?;
        let Some(stored) = self.store.get(&session_key(&wallet)).await? else {
            return Ok(false);
        };
        Ok(stored.as_bytes().ct_eq(token.trim().as_bytes()).into())
    }
}
