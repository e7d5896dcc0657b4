// src/wallet/signature.rs
//! Wallet signature verification.
//!
//! Checks that a `personal_sign` signature over a challenge message was
//! produced by the private key behind a claimed Ethereum address. The
//! address is recovered from the signature itself, so no public key needs
//! to be registered beforehand.

use ethers::utils::hex;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

use crate::error::ApiError;
use crate::utils::crypto::{address_from_public_key, addresses_match, personal_message_digest};

/// r (32) ‖ s (32) ‖ v (1)
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset wallets add to the recovery id in the `v` byte.
const RECOVERY_OFFSET: u8 = 27;

/// Verifies that `signature_hex` signs `message` for `claimed_wallet`.
///
/// # Arguments
/// * `message` - The exact challenge string the wallet signed (the nonce)
/// * `signature_hex` - 65-byte `r ‖ s ‖ v` signature, hex-encoded (with or without 0x prefix)
/// * `claimed_wallet` - Address the caller claims to control
///
/// # Returns
/// - `Ok(true)` if the recovered address equals `claimed_wallet` (case-insensitive)
/// - `Ok(false)` if the signature is well formed but made by another key
///
/// # Errors
/// - `InvalidSignatureFormat` - signature is not valid hex
/// - `InvalidSignatureLength` - decoded signature is not 65 bytes
/// - `InvalidRecoveryId` - `v` is neither 27 nor 28
/// - `PublicKeyRecoveryFailed` - no public key can be recovered from the signature
pub fn verify(message: &str, signature_hex: &str, claimed_wallet: &str) -> Result<bool, ApiError> {
    let raw = signature_hex.trim();
    let raw = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let bytes = hex::decode(raw).map_err(|_| ApiError::InvalidSignatureFormat)?;

    if bytes.len() != SIGNATURE_LENGTH {
        return Err(ApiError::InvalidSignatureLength);
    }

    let v = bytes[SIGNATURE_LENGTH - 1];
    if v != RECOVERY_OFFSET && v != RECOVERY_OFFSET + 1 {
        return Err(ApiError::InvalidRecoveryId);
    }

    let recovered = recover_address(message, &bytes[..SIGNATURE_LENGTH - 1], v - RECOVERY_OFFSET)?;
    Ok(addresses_match(&recovered, claimed_wallet))
}

/// Recovers the signer address of a `personal_sign` signature.
///
/// `rs` is the 64-byte `r ‖ s` pair and `recovery` the normalised (0/1)
/// recovery id. High-S signatures are accepted and normalised to low-S with
/// the recovery parity flipped.
pub fn recover_address(message: &str, rs: &[u8], recovery: u8) -> Result<String, ApiError> {
    let digest = personal_message_digest(message);

    let mut signature = Signature::from_slice(rs).map_err(|_| ApiError::PublicKeyRecoveryFailed)?;
    let mut recovery_id = RecoveryId::from_byte(recovery).ok_or(ApiError::InvalidRecoveryId)?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| ApiError::PublicKeyRecoveryFailed)?;
    Ok(address_from_public_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::key_management::KeyManager;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::U256;

    const DEV_KEY: &str = "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";
    const DEV_ADDRESS: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";
    const NONCE: &str = "6b1f9a52-4c1e-4f0b-a7b3-2f5de1c0a9e4";

    fn dev_signature(message: &str) -> String {
        KeyManager::from_hex(DEV_KEY)
            .unwrap()
            .sign_personal_message(message)
            .unwrap()
    }

    #[test]
    fn accepts_signature_from_claimed_wallet() {
        let signature = dev_signature(NONCE);
        assert_eq!(verify(NONCE, &signature, DEV_ADDRESS), Ok(true));
        // Checksummed / upper-case claims compare equal.
        assert_eq!(verify(NONCE, &signature, &DEV_ADDRESS.to_uppercase()), Ok(true));
    }

    #[tokio::test]
    async fn accepts_signature_from_ethers_wallet() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let signature = wallet.sign_message(NONCE).await.unwrap();
        let encoded = format!("0x{}", hex::encode(signature.to_vec()));

        assert_eq!(verify(NONCE, &encoded, DEV_ADDRESS), Ok(true));
        assert_eq!(verify(NONCE, &encoded, &format!("{:?}", wallet.address())), Ok(true));
    }

    #[test]
    fn rejects_signature_over_other_message() {
        let signature = dev_signature("some other nonce");
        assert_eq!(verify(NONCE, &signature, DEV_ADDRESS), Ok(false));
    }

    #[test]
    fn rejects_signature_for_other_wallet() {
        let signature = KeyManager::new().sign_personal_message(NONCE).unwrap();
        assert_eq!(verify(NONCE, &signature, DEV_ADDRESS), Ok(false));
    }

    #[test]
    fn single_byte_mutation_never_verifies() {
        let signature = dev_signature(NONCE);
        let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();

        for index in 0..SIGNATURE_LENGTH {
            let mut mutated = bytes.clone();
            mutated[index] ^= 0x01;
            let result = verify(NONCE, &hex::encode(&mutated), DEV_ADDRESS);
            assert_ne!(result, Ok(true), "mutation at byte {index} still verified");
        }
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert_eq!(
            verify(NONCE, "0xnot-a-signature", DEV_ADDRESS),
            Err(ApiError::InvalidSignatureFormat)
        );
    }

    #[test]
    fn rejects_wrong_length() {
        let signature = dev_signature(NONCE);
        let short = &signature[..signature.len() - 2];
        assert_eq!(
            verify(NONCE, short, DEV_ADDRESS),
            Err(ApiError::InvalidSignatureLength)
        );
    }

    #[test]
    fn rejects_unnormalised_recovery_byte() {
        let signature = dev_signature(NONCE);
        let mut bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
        bytes[64] -= 27;
        assert_eq!(
            verify(NONCE, &hex::encode(&bytes), DEV_ADDRESS),
            Err(ApiError::InvalidRecoveryId)
        );
    }

    #[test]
    fn zero_scalars_fail_recovery() {
        let mut bytes = vec![0u8; SIGNATURE_LENGTH];
        bytes[64] = 27;
        assert_eq!(
            verify(NONCE, &hex::encode(&bytes), DEV_ADDRESS),
            Err(ApiError::PublicKeyRecoveryFailed)
        );
    }

    #[test]
    fn high_s_signature_is_normalised() {
        let signature = dev_signature(NONCE);
        let mut bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();

        // s' = n - s, with the recovery parity flipped, is the same signature.
        let order = U256::from_str_radix(
            "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
            16,
        )
        .unwrap();
        let s = U256::from_big_endian(&bytes[32..64]);
        (order - s).to_big_endian(&mut bytes[32..64]);
        bytes[64] = if bytes[64] == 27 { 28 } else { 27 };

        assert_eq!(verify(NONCE, &hex::encode(&bytes), DEV_ADDRESS), Ok(true));
    }
}
