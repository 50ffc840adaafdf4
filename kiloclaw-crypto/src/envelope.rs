//! Envelope decryption for user secrets and channel tokens (spec §4.3.10
//! steps 3-4): RSA-OAEP unwraps a random AES-256 data key, then AES-256-GCM
//! decrypts the payload with that key.
//!
//! The math itself is an external collaborator per spec §1 — the primitives
//! belong to the platform's shared encryption library, not this controller.
//! What lives here is the narrow trait boundary the Instance Controller
//! depends on, plus one concrete implementation so the crate is runnable
//! standalone and testable without a second service.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{CryptoError, Result};
use kiloclaw_core::models::SecretEnvelope;

const IV_LEN: usize = 12;

/// Unwraps a [`SecretEnvelope`] into its plaintext. Implementations are
/// injected into the Instance Controller so tests can substitute a fake that
/// never touches real key material.
pub trait SecretEnvelopeDecryptor: Send + Sync {
    fn decrypt(&self, envelope: &SecretEnvelope) -> Result<String>;
}

/// Real RSA-OAEP + AES-256-GCM unwrap, keyed by the instance owner's RSA
/// private key.
pub struct RsaAesEnvelopeDecryptor {
    private_key: RsaPrivateKey,
}

impl RsaAesEnvelopeDecryptor {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }
}

impl SecretEnvelopeDecryptor for RsaAesEnvelopeDecryptor {
    fn decrypt(&self, envelope: &SecretEnvelope) -> Result<String> {
        let wrapped_key = BASE64
            .decode(&envelope.encrypted_key)
            .map_err(CryptoError::Base64)?;
        let iv = BASE64.decode(&envelope.iv).map_err(CryptoError::Base64)?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(CryptoError::Base64)?;

        if iv.len() != IV_LEN {
            return Err(CryptoError::Malformed(format!(
                "envelope iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }

        let data_key = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
            .map_err(|e| CryptoError::EnvelopeUnwrap(e.to_string()))?;

        let key = Key::<Aes256Gcm>::from_slice(&data_key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&iv);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Malformed("non-utf8 secret plaintext".to_string()))
    }
}

/// Test/ops helper: encrypt a plaintext into a [`SecretEnvelope`] the way the
/// upstream encryption service would, for use against a known public key.
pub fn seal_for_testing(public_key: &RsaPublicKey, plaintext: &str) -> Result<SecretEnvelope> {
    use rand::RngCore;

    let mut data_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut data_key);
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&data_key));
    let nonce = Nonce::from_slice(&iv);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let wrapped_key = public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &data_key)
        .map_err(|e| CryptoError::EnvelopeUnwrap(e.to_string()))?;

    Ok(SecretEnvelope {
        encrypted_key: BASE64.encode(wrapped_key),
        iv: BASE64.encode(iv),
        ciphertext: BASE64.encode(ciphertext),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs1::DecodeRsaPrivateKey;

    fn test_key() -> RsaPrivateKey {
        // A small (1024-bit) fixed key keeps the test fast; never used in
        // production — real deployments source their key from the shared
        // encryption service out of scope here.
        let pem = RsaPrivateKey::new(&mut rand::thread_rng(), 1024)
            .unwrap()
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .unwrap();
        RsaPrivateKey::from_pkcs1_pem(&pem).unwrap()
    }

    #[test]
    fn round_trips_through_seal_and_decrypt() {
        let private_key = test_key();
        let public_key = RsaPublicKey::from(&private_key);

        let envelope = seal_for_testing(&public_key, "super-secret-value").unwrap();
        let decryptor = RsaAesEnvelopeDecryptor::new(private_key);

        assert_eq!(decryptor.decrypt(&envelope).unwrap(), "super-secret-value");
    }

    #[test]
    fn rejects_envelope_for_a_different_key() {
        let private_key = test_key();
        let other_private_key = test_key();
        let other_public_key = RsaPublicKey::from(&other_private_key);

        let envelope = seal_for_testing(&other_public_key, "secret").unwrap();
        let decryptor = RsaAesEnvelopeDecryptor::new(private_key);

        assert!(decryptor.decrypt(&envelope).is_err());
    }
}
