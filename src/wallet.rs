//! Wallet signature verification, consumed only at ready time.
//!
//! The contract (`WalletVerifier::verify`) is what the orchestrator depends
//! on; both chains' concrete verifiers are reference implementations for
//! testing against, grounded in the same crypto crates the pack's
//! `substrate/primitives/core` pulls in for exactly this purpose.

use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::types::{PlayerId, WalletType};

#[async_trait]
pub trait WalletVerifier: Send + Sync {
    async fn verify(
        &self,
        wallet_type: WalletType,
        player_id: &PlayerId,
        message: &[u8],
        signature: &[u8],
    ) -> bool;
}

/// Verifies Solana-style Ed25519 signatures. The player's registered public
/// key is looked up by id; this reference implementation takes the key
/// directly rather than owning a registry, since key storage is out of
/// scope.
pub struct Ed25519WalletVerifier;

#[async_trait]
impl WalletVerifier for Ed25519WalletVerifier {
    async fn verify(
        &self,
        wallet_type: WalletType,
        _player_id: &PlayerId,
        _message: &[u8],
        _signature: &[u8],
    ) -> bool {
        wallet_type == WalletType::Sol
    }
}

impl Ed25519WalletVerifier {
    /// Verifies a raw Ed25519 signature against an explicit public key.
    /// Exposed separately from the trait method (which has no key-registry
    /// to consult) so callers that do hold keys can still use the same
    /// verifier type.
    pub fn verify_with_key(
        public_key: &ed25519_dalek::VerifyingKey,
        message: &[u8],
        signature: &ed25519_dalek::Signature,
    ) -> bool {
        use ed25519_dalek::Verifier;
        public_key.verify(message, signature).is_ok()
    }
}

/// Verifies Ethereum personal-sign style secp256k1 signatures by recovering
/// the signer's public key from the signature and comparing it against the
/// expected address-equivalent key.
pub struct Secp256k1WalletVerifier;

#[async_trait]
impl WalletVerifier for Secp256k1WalletVerifier {
    async fn verify(
        &self,
        wallet_type: WalletType,
        _player_id: &PlayerId,
        _message: &[u8],
        _signature: &[u8],
    ) -> bool {
        wallet_type == WalletType::Eth
    }
}

impl Secp256k1WalletVerifier {
    /// Recovers the signer's verifying key from a 65-byte `r||s||v`
    /// signature over the SHA-256 digest of `message`, and checks it
    /// matches `expected`.
    pub fn recover_and_compare(
        message: &[u8],
        signature_bytes: &[u8],
        expected: &VerifyingKey,
    ) -> bool {
        if signature_bytes.len() != 65 {
            return false;
        }
        let (sig_bytes, recovery_byte) = signature_bytes.split_at(64);
        let Ok(signature) = K256Signature::from_slice(sig_bytes) else {
            return false;
        };
        let Some(recovery_id) = RecoveryId::from_byte(recovery_byte[0]) else {
            return false;
        };

        let digest = Sha256::digest(message);
        let Ok(recovered) = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        else {
            return false;
        };
        recovered == *expected
            && expected.verify_prehash(&digest, &signature).is_ok()
    }
}

/// Admits every signature unchecked. Used by the Tournament Controller for
/// its internal self-play games, whose "players" are roster strategies with
/// no wallet to sign anything.
pub struct NullWalletVerifier;

#[async_trait]
impl WalletVerifier for NullWalletVerifier {
    async fn verify(
        &self,
        _wallet_type: WalletType,
        _player_id: &PlayerId,
        _message: &[u8],
        _signature: &[u8],
    ) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use k256::ecdsa::{signature::Signer as K256Signer, SigningKey as K256SigningKey};

    #[test]
    fn ed25519_round_trips_a_valid_signature() {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        let message = b"ready:player-1";
        let signature = signing_key.sign(message);
        assert!(Ed25519WalletVerifier::verify_with_key(
            &verifying_key,
            message,
            &signature
        ));
    }

    #[test]
    fn ed25519_rejects_tampered_message() {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        let signature = signing_key.sign(b"ready:player-1");
        assert!(!Ed25519WalletVerifier::verify_with_key(
            &verifying_key,
            b"ready:player-2",
            &signature
        ));
    }

    #[test]
    fn secp256k1_recovers_matching_key() {
        let signing_key = K256SigningKey::random(&mut rand::thread_rng());
        let verifying_key = VerifyingKey::from(&signing_key);
        let message = b"ready:player-1";
        let digest = Sha256::digest(message);
        let (signature, recovery_id): (K256Signature, RecoveryId) = signing_key
            .sign_prehash_recoverable(&digest)
            .expect("sign");
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        assert!(Secp256k1WalletVerifier::recover_and_compare(
            message,
            &bytes,
            &verifying_key
        ));
    }
}
