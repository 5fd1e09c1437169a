//! Message signatures and hybrid encryption layered on top of frame values.
//!
//! A signed value is `value || ';' || signature`, where the signature is the
//! Ed25519 signature of `SHA-256(value)` and always occupies the final
//! [`SIGNATURE_LEN`] bytes. Verification slices from the end; there is no
//! length field.
//!
//! An envelope is `key block || nonce || ciphertext`. The key block is a fixed
//! [`ENCRYPTED_KEY_LEN`] bytes: an ephemeral X25519 public key followed by the
//! random content key sealed under a key derived from the ephemeral agreement
//! with the recipient. The content key encrypts the value with
//! XChaCha20-Poly1305 under a fresh nonce.
//!
//! Senders sign and then encrypt; receivers decrypt and then verify.

use crate::crypto::errors::{CryptoError, Result};
use crate::crypto::identity::Identity;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;
use x25519_dalek::{EphemeralSecret, PublicKey as AgreementPublic};

pub const SIGNATURE_LEN: usize = 64;
pub const SIGNATURE_SEPARATOR: u8 = b';';

pub const CONTENT_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const AEAD_TAG_LEN: usize = 16;
pub const EPHEMERAL_KEY_LEN: usize = 32;
pub const ENCRYPTED_KEY_LEN: usize = EPHEMERAL_KEY_LEN + CONTENT_KEY_LEN + AEAD_TAG_LEN;
pub const MIN_ENVELOPE_LEN: usize = ENCRYPTED_KEY_LEN + NONCE_LEN + AEAD_TAG_LEN;

const KEY_WRAP_CONTEXT: &[u8] = b"gambit/envelope/key-wrap/v1";

/// Append a separator and the signature of `SHA-256(value)`.
pub fn sign(value: &[u8], identity: &Identity) -> Vec<u8> {
    let digest = Sha256::digest(value);
    let signature = identity.sign(&digest);

    let mut signed = Vec::with_capacity(value.len() + 1 + SIGNATURE_LEN);
    signed.extend_from_slice(value);
    signed.push(SIGNATURE_SEPARATOR);
    signed.extend_from_slice(&signature.to_bytes());
    signed
}

/// Check the trailing signature. Only an undersized input is an error; every
/// cryptographic mismatch is reported as `Ok(false)`.
pub fn verify(signed: &[u8], key: &VerifyingKey) -> Result<bool> {
    let (body, separator, signature) = split_signed(signed)?;
    if separator != SIGNATURE_SEPARATOR {
        trace!("Signature separator mismatch");
        return Ok(false);
    }

    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return Ok(false),
    };
    let digest = Sha256::digest(body);
    Ok(key.verify(&digest, &signature).is_ok())
}

/// The value a signature was computed over
pub fn strip_signature(signed: &[u8]) -> Result<&[u8]> {
    split_signed(signed).map(|(body, _, _)| body)
}

fn split_signed(signed: &[u8]) -> Result<(&[u8], u8, &[u8])> {
    let min = SIGNATURE_LEN + 1;
    if signed.len() < min {
        return Err(CryptoError::SignedValueTooShort {
            len: signed.len(),
            min,
        });
    }
    let (rest, signature) = signed.split_at(signed.len() - SIGNATURE_LEN);
    let (body, separator) = rest.split_at(rest.len() - 1);
    Ok((body, separator[0], signature))
}

/// Encrypt `value` so that only the holder of `recipient`'s secret can read it.
pub fn encrypt(value: &[u8], recipient: &VerifyingKey) -> Result<Vec<u8>> {
    let recipient_public = AgreementPublic::from(recipient.to_montgomery().to_bytes());
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = AgreementPublic::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient_public);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKeyAgreement);
    }

    let wrap_key = derive_wrap_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient_public.as_bytes(),
    );

    let mut content_key = [0u8; CONTENT_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut content_key);
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    // The wrap key is derived from a fresh ephemeral secret and used once,
    // so a fixed nonce is sound here.
    let sealed_key = XChaCha20Poly1305::new((&wrap_key).into())
        .encrypt(&XNonce::default(), content_key.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let ciphertext = XChaCha20Poly1305::new((&content_key).into())
        .encrypt(XNonce::from_slice(&nonce), value)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut envelope = Vec::with_capacity(ENCRYPTED_KEY_LEN + NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&sealed_key);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    debug_assert_eq!(sealed_key.len(), CONTENT_KEY_LEN + AEAD_TAG_LEN);
    Ok(envelope)
}

/// Open an envelope addressed to `identity`. Wrong keys and tampering both
/// surface as [`CryptoError::DecryptionFailed`].
pub fn decrypt(envelope: &[u8], identity: &Identity) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoError::EnvelopeTooShort {
            len: envelope.len(),
            min: MIN_ENVELOPE_LEN,
        });
    }

    let (key_block, rest) = envelope.split_at(ENCRYPTED_KEY_LEN);
    let (ephemeral_bytes, sealed_key) = key_block.split_at(EPHEMERAL_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let mut ephemeral = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = AgreementPublic::from(ephemeral);

    let own_public = AgreementPublic::from(identity.verifying_key().to_montgomery().to_bytes());
    let shared = identity.agreement_secret().diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed);
    }

    let wrap_key = derive_wrap_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        own_public.as_bytes(),
    );
    let content_key = XChaCha20Poly1305::new((&wrap_key).into())
        .decrypt(&XNonce::default(), sealed_key)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let content_key: [u8; CONTENT_KEY_LEN] = content_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;

    XChaCha20Poly1305::new((&content_key).into())
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn derive_wrap_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_WRAP_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    hasher.finalize().into()
}

/// Sign with `sender`, then encrypt to `recipient`.
pub fn seal(value: &[u8], sender: &Identity, recipient: &VerifyingKey) -> Result<Vec<u8>> {
    encrypt(&sign(value, sender), recipient)
}

/// Verify a signed value and return its body.
pub fn open_signed<'a>(signed: &'a [u8], sender: &VerifyingKey) -> Result<&'a [u8]> {
    if !verify(signed, sender)? {
        return Err(CryptoError::InvalidSignature);
    }
    strip_signature(signed)
}

/// Decrypt with `recipient`, then verify against `sender` and return the body.
pub fn open_sealed(envelope: &[u8], recipient: &Identity, sender: &VerifyingKey) -> Result<Vec<u8>> {
    let signed = decrypt(envelope, recipient)?;
    open_signed(&signed, sender).map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_layout() {
        let identity = Identity::generate();
        let signed = sign(b"payload", &identity);
        assert_eq!(signed.len(), b"payload".len() + 1 + SIGNATURE_LEN);
        assert_eq!(signed[b"payload".len()], SIGNATURE_SEPARATOR);
        assert_eq!(strip_signature(&signed).unwrap(), b"payload");
    }

    #[test]
    fn test_empty_value_can_be_signed() {
        let identity = Identity::generate();
        let signed = sign(b"", &identity);
        assert!(verify(&signed, &identity.verifying_key()).unwrap());
        assert!(strip_signature(&signed).unwrap().is_empty());
    }

    #[test]
    fn test_undersized_value_is_an_error() {
        let identity = Identity::generate();
        let err = verify(&[0u8; SIGNATURE_LEN], &identity.verifying_key()).unwrap_err();
        assert!(matches!(err, CryptoError::SignedValueTooShort { len: 64, min: 65 }));
    }

    #[test]
    fn test_sealed_round_trip() {
        let client = Identity::generate();
        let server = Identity::generate();

        let envelope = seal(b"e4", &client, &server.verifying_key()).unwrap();
        let body = open_sealed(&envelope, &server, &client.verifying_key()).unwrap();
        assert_eq!(body, b"e4");
    }

    #[test]
    fn test_sealed_with_wrong_sender_key() {
        let client = Identity::generate();
        let server = Identity::generate();
        let impostor = Identity::generate();

        let envelope = seal(b"e4", &impostor, &server.verifying_key()).unwrap();
        assert_eq!(
            open_sealed(&envelope, &server, &client.verifying_key()),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_short_envelope() {
        let identity = Identity::generate();
        assert!(matches!(
            decrypt(&[0u8; MIN_ENVELOPE_LEN - 1], &identity),
            Err(CryptoError::EnvelopeTooShort { .. })
        ));
    }
}
