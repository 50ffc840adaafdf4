//! `OPENCLAW_GATEWAY_TOKEN = HMAC(secret, sandbox_id)` — spec §4.3.10 step 5.
//! A reserved system var, never overridable by user input.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derive the per-instance gateway token from the worker-level HMAC secret
/// and the instance's `sandbox_id`.
pub fn gateway_token(hmac_secret: &[u8], sandbox_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(hmac_secret).expect("HMAC accepts any key length");
    mac.update(sandbox_id.as_bytes());
    let result = mac.finalize().into_bytes();
    hex::encode(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = gateway_token(b"secret", "sandbox-1");
        let b = gateway_token(b"secret", "sandbox-1");
        assert_eq!(a, b);
    }

    #[test]
    fn differs_across_sandboxes() {
        let a = gateway_token(b"secret", "sandbox-1");
        let b = gateway_token(b"secret", "sandbox-2");
        assert_ne!(a, b);
    }
}
