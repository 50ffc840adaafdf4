//! AES-256-GCM encryption of sensitive per-machine env vars under the app's
//! `env_key` (spec §4.3.10, wire format in spec §6).
//!
//! Ciphertext format: `"enc:v1:" + base64(IV[12] || ciphertext || tag[16])`.
//! The machine-side reader that consumes this format is out of scope (spec
//! §1); only the controller-side encrypt path and its test-only decrypt
//! inverse live here.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::error::{CryptoError, Result};
use kiloclaw_core::constants::ENC_WIRE_PREFIX;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Generate a fresh 32-byte symmetric key, base64-encoded. Called once per
/// app by the App Controller's `ensure_env_key`.
pub fn generate_env_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(key)
}

fn load_key(env_key_b64: &str) -> Result<Key<Aes256Gcm>> {
    let raw = BASE64
        .decode(env_key_b64)
        .map_err(CryptoError::Base64)?;
    if raw.len() != KEY_LEN {
        return Err(CryptoError::Malformed(format!(
            "env_key must decode to {KEY_LEN} bytes, got {}",
            raw.len()
        )));
    }
    Ok(*Key::<Aes256Gcm>::from_slice(&raw))
}

/// Encrypt `plaintext` under the app's base64 `env_key`, returning the
/// `enc:v1:` wire value placed in the machine's env under
/// `KILOCLAW_ENC_<OriginalName>`.
pub fn encrypt_sensitive(env_key_b64: &str, plaintext: &str) -> Result<String> {
    let key = load_key(env_key_b64)?;
    let cipher = Aes256Gcm::new(&key);

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&ciphertext);

    Ok(format!("{ENC_WIRE_PREFIX}{}", BASE64.encode(payload)))
}

/// Inverse of [`encrypt_sensitive`]. Not needed by the machine (that's the
/// out-of-scope guest-side reader) but required to prove the round-trip law
/// in spec §8 property 6 and useful for controller-side tests.
pub fn decrypt_sensitive(env_key_b64: &str, wire_value: &str) -> Result<String> {
    let key = load_key(env_key_b64)?;
    let cipher = Aes256Gcm::new(&key);

    let encoded = wire_value
        .strip_prefix(ENC_WIRE_PREFIX)
        .ok_or_else(|| CryptoError::Malformed("missing enc:v1: prefix".to_string()))?;
    let payload = BASE64.decode(encoded).map_err(CryptoError::Base64)?;

    if payload.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::Malformed("ciphertext too short".to_string()));
    }
    let (iv, ciphertext) = payload.split_at(IV_LEN);
    let nonce = Nonce::from_slice(iv);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("non-utf8 plaintext".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let key = generate_env_key();
        for plaintext in ["", "hello", "a-very-secret-token-value-12345", "😀 unicode"] {
            let wire = encrypt_sensitive(&key, plaintext).unwrap();
            assert!(wire.starts_with(ENC_WIRE_PREFIX));
            assert_eq!(decrypt_sensitive(&key, &wire).unwrap(), plaintext);
        }
    }

    #[test]
    fn distinct_ivs_produce_distinct_ciphertexts() {
        let key = generate_env_key();
        let a = encrypt_sensitive(&key, "same-plaintext").unwrap();
        let b = encrypt_sensitive(&key, "same-plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_key_length() {
        let bad_key = BASE64.encode([0u8; 16]);
        assert!(encrypt_sensitive(&bad_key, "x").is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = generate_env_key();
        let mut wire = encrypt_sensitive(&key, "hello").unwrap();
        wire.push('A');
        assert!(decrypt_sensitive(&key, &wire).is_err());
    }
}
