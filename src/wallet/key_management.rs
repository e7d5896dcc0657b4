// src/wallet/key_management.rs
//! Wallet-side key management.
//!
//! Plays the part of a user's wallet: holds a secp256k1 key, reports the
//! Ethereum address it controls and answers authentication challenges with
//! `personal_sign` signatures that [`crate::wallet::signature::verify`] accepts.
//!
//! Uses the following cryptographic primitives:
//! - secp256k1 curve (via `k256` crate)
//! - Keccak-256 hashing (via `ethers` crate)
//! - Cryptographically secure random number generation

use anyhow::Context;
use ethers::utils::hex;
use k256::ecdsa::SigningKey;

use crate::utils::crypto::{address_from_public_key, personal_message_digest};

/// Holder of a single wallet key.
///
/// # Security Notes
/// - The signing key is never exposed
/// - Signatures are deterministic (RFC 6979) and always low-S
#[derive(Clone)]
pub struct KeyManager {
    /// Securely stored private key (never exposed)
    signing_key: SigningKey,
    /// Lowercase `0x` address derived from the public key
    address: String,
}

impl KeyManager {
    /// Generates a KeyManager with a fresh random key.
    pub fn new() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Loads a key from its hex encoding (with or without 0x prefix).
    ///
    /// # Errors
    /// Returns an error if the string is not hex or not a valid secp256k1 scalar.
    pub fn from_hex(private_key: &str) -> anyhow::Result<Self> {
        let trimmed = private_key.trim();
        let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
            .context("private key is not valid hex")?;
        let signing_key =
            SigningKey::from_slice(&bytes).context("private key is not a valid secp256k1 scalar")?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_from_public_key(signing_key.verifying_key());
        KeyManager {
            signing_key,
            address,
        }
    }

    /// Ethereum address controlled by this key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Signs `message` the way wallets implement `personal_sign`.
    ///
    /// # Returns
    /// `0x`-prefixed hex of the 65-byte `r ‖ s ‖ v` signature, with `v` in {27, 28}.
    ///
    /// # Process Flow
    /// 1. Frames the message with the Ethereum signed-message prefix
    /// 2. Hashes the framed message with Keccak-256
    /// 3. Signs the hash with recoverable ECDSA
    pub fn sign_personal_message(&self, message: &str) -> Result<String, k256::ecdsa::Error> {
        let digest = personal_message_digest(message);
        let (signature, recovery_id) = self.signing_key.sign_prehash_recoverable(&digest)?;

        let mut bytes = signature.to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}
