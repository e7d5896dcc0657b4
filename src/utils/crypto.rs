// src/utils/crypto.rs
//! Cryptographic utilities for Ethereum-compatible wallet identity.
//!
//! Uses Keccak-256 (Ethereum's standard hash function) for all digests and
//! the standard Ethereum address derivation from secp256k1 public keys.

use ethers::utils::{hex, keccak256};
use k256::ecdsa::VerifyingKey;
use rand::RngCore;

use crate::error::ApiError;

/// Prefix prepended by wallets to every `personal_sign` message.
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Computes the digest a wallet signs for `personal_sign`.
///
/// The message is framed as `"\x19Ethereum Signed Message:\n" + len + message`,
/// where `len` is the decimal byte length of the message, and then hashed
/// with Keccak-256.
pub fn personal_message_digest(message: &str) -> [u8; 32] {
    let mut framed = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 20 + message.len());
    framed.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
    framed.extend_from_slice(message.len().to_string().as_bytes());
    framed.extend_from_slice(message.as_bytes());
    hash_data(&framed)
}

/// Derives the Ethereum address of a secp256k1 public key.
///
/// The address is the last 20 bytes of the Keccak-256 hash of the
/// uncompressed public key without its `0x04` tag byte.
///
/// # Returns
/// Lowercase hex string with `0x` prefix (e.g., "0x90f8bf6a...")
pub fn address_from_public_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = hash_data(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Hex digits in a 20-byte address.
const ADDRESS_HEX_LEN: usize = 40;

/// Canonical `0x`-prefixed lowercase form of a wallet address.
///
/// Accepts surrounding whitespace, an optional `0x`/`0X` prefix and any hex
/// case. Returns `None` for anything that is not exactly 20 hex-encoded bytes,
/// so only canonical addresses ever reach store keys or record columns.
pub fn normalize_wallet(wallet: &str) -> Option<String> {
    let trimmed = wallet.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() != ADDRESS_HEX_LEN || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", digits.to_ascii_lowercase()))
}

/// [`normalize_wallet`] with the error callers report: `missing` for a blank
/// value, `InvalidData` for a value that is not an address.
pub fn require_wallet(wallet: &str, missing: ApiError) -> Result<String, ApiError> {
    if wallet.trim().is_empty() {
        return Err(missing);
    }
    normalize_wallet(wallet).ok_or(ApiError::InvalidData)
}

/// Compares two addresses by their canonical form. Non-addresses never match.
pub fn addresses_match(a: &str, b: &str) -> bool {
    match (normalize_wallet(a), normalize_wallet(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Generates `len` bytes from the thread-local CSPRNG, hex-encoded.
pub fn random_hex_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
