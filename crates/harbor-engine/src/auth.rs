//! ed25519 signatures over proposals.
//!
//! A proposal is signed over its canonical JSON encoding: serde_json output
//! of the struct, fields in declaration order, no whitespace.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use harbor_types::JwsSignature;
use serde::Serialize;

/// Bytes a proposal signature covers.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Whether `signature` is a valid ed25519 signature of `message` by
/// `public_key`. Malformed keys and signatures do not verify.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(message, &signature).is_ok()
}

/// Sign `value` with `key`, tagging the signature with `kid`.
pub fn sign<T: Serialize>(
    key: &SigningKey,
    kid: impl Into<String>,
    value: &T,
) -> Result<JwsSignature, serde_json::Error> {
    let message = canonical_bytes(value)?;
    Ok(JwsSignature {
        kid: kid.into(),
        signature: key.sign(&message).to_bytes().to_vec(),
    })
}
