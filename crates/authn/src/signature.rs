//! Ethereum `personal_sign` signature recovery.
//!
//! A login challenge is signed by the client's wallet with `personal_sign`.
//! The signed digest is
//! `keccak256("\x19Ethereum Signed Message:\n" ‖ len(message) ‖ message)` and the
//! signature is 65 bytes `r ‖ s ‖ v`. Recovery yields the secp256k1 public
//! key; its address is the last 20 bytes of the keccak256 hash of the
//! uncompressed point without the `0x04` tag.
//!
//! Recovery is pure: no state, no I/O. Comparing the recovered identity with
//! the claimed one is the caller's job.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use trustkey_storage::Identity;

use crate::error::{AuthError, Result};

/// Length of an `r ‖ s ‖ v` signature in bytes.
pub const SIGNATURE_LEN: usize = 65;

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Recovers the signing identity from a message and its signature.
pub trait SignatureVerifier: Send + Sync {
    /// Returns the identity whose key produced `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedSignature`] if the signature cannot be
    /// decoded or no key can be recovered from it.
    fn recover(&self, message: &str, signature: &str) -> Result<Identity>;
}

impl<V: SignatureVerifier + ?Sized> SignatureVerifier for std::sync::Arc<V> {
    fn recover(&self, message: &str, signature: &str) -> Result<Identity> {
        (**self).recover(message, signature)
    }
}

/// [`SignatureVerifier`] for Ethereum `personal_sign` signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonalSignVerifier;

impl SignatureVerifier for PersonalSignVerifier {
    fn recover(&self, message: &str, signature: &str) -> Result<Identity> {
        let bytes = decode_signature(signature)?;
        let hash = personal_message_hash(message);

        let mut sig =
            Signature::from_slice(&bytes[..64]).map_err(|_| AuthError::MalformedSignature)?;
        let mut recovery_id = recovery_id(bytes[64])?;

        // k256 only accepts low-s signatures; flip a high-s one and its parity.
        if let Some(normalized) = sig.normalize_s() {
            sig = normalized;
            recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
        }

        let key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
            .map_err(|_| AuthError::MalformedSignature)?;
        Ok(identity_from_verifying_key(&key))
    }
}

/// Computes the `personal_sign` digest of a message.
#[must_use]
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derives the address identity of a secp256k1 public key.
#[must_use]
pub fn identity_from_verifying_key(key: &VerifyingKey) -> Identity {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Identity::from_address_bytes(&address)
}

fn decode_signature(signature: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let signature = signature.trim();
    let hex_part = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    let bytes = hex::decode(hex_part).map_err(|_| AuthError::MalformedSignature)?;
    bytes.try_into().map_err(|_| AuthError::MalformedSignature)
}

fn recovery_id(v: u8) -> Result<RecoveryId> {
    let byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        _ => return Err(AuthError::MalformedSignature),
    };
    RecoveryId::from_byte(byte).ok_or(AuthError::MalformedSignature)
}
