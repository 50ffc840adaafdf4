//! Identifier derivation (spec §3): `app_name` and `sandbox_id` are both
//! deterministic functions of `user_id`, computed once and never recomputed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// `prefix-<first 20 hex chars of SHA-256(user_id)>`. Two different user ids
/// landing on the same `app_name` is the security-relevant collision guarded
/// against in `kiloclaw-provider::apps::create_app`.
pub fn derive_app_name(prefix: &str, user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    let hex = hex::encode(digest);
    format!("{prefix}{}", &hex[..20])
}

/// `SHA-256(user_id)` truncated to 16 bytes and URL-safe base64 encoded
/// (unpadded). Spec §3 leaves the exact truncation/encoding unspecified
/// beyond "truncated and encoded URL-safely"; 16 bytes gives a collision
/// space comparable to the 20 hex chars (80 bits) used for `app_name`.
pub fn derive_sandbox_id(user_id: &str) -> String {
    let digest = Sha256::digest(user_id.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_deterministic_and_prefixed() {
        let a = derive_app_name("dev-", "user-1");
        let b = derive_app_name("dev-", "user-1");
        assert_eq!(a, b);
        assert!(a.starts_with("dev-"));
        assert_eq!(a.len(), "dev-".len() + 20);
    }

    #[test]
    fn different_users_get_different_app_names() {
        assert_ne!(
            derive_app_name("dev-", "user-1"),
            derive_app_name("dev-", "user-2")
        );
    }

    #[test]
    fn sandbox_id_is_deterministic_and_url_safe() {
        let a = derive_sandbox_id("user-1");
        let b = derive_sandbox_id("user-1");
        assert_eq!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }
}
