use thiserror::Error;

use kiloclaw_core::constants::CAPACITY_MARKERS;

/// Raw, classified error from a provider REST call. Every client method that
/// can fail for a provider-side reason returns this inside [`ClientError`].
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub status: u16,
    pub body: String,
    pub message: String,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider error {}: {}", self.status, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = extract_message(&body).unwrap_or_else(|| body.clone());
        Self { status, body, message }
    }
}

/// Best-effort extraction of a human-readable message out of a provider
/// error body, whether it's `{"error": "..."}`, `{"message": "..."}`, or
/// plain text.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Everything a [`crate::ProviderClient`] call can fail with.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// `create_app` returned 409 and the listed machines are tagged to a
    /// different user — a hash-truncation tenant-isolation breach. Spec §4.1,
    /// §7: non-recoverable, surfaced for operator investigation.
    #[error("app name collision: {app_name} is already owned by a different user (requested by {requesting_user_id})")]
    AppNameCollision {
        app_name: String,
        requesting_user_id: String,
    },

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

/// `true` iff the call targeted a resource that is gone. Usually
/// success-equivalent: delete becomes a no-op, start recreates, reconcile
/// clears the stale id.
pub fn not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::Provider(p) if p.status == 404)
}

/// `true` iff a `409`/`412` response's body carries one of the capacity
/// markers, case-insensitively. A `409`/`412` without a marker returns
/// `false` and logs an "unclassified" warning — `412` doubles as the
/// optimistic-concurrency mismatch code for `min_secrets_version`, which must
/// never be misread as a capacity signal (spec §4.1, tested by S9).
pub fn insufficient_resources(err: &ClientError) -> bool {
    let ClientError::Provider(p) = err else {
        return false;
    };
    if p.status != 409 && p.status != 412 {
        return false;
    }
    let body_lower = p.body.to_lowercase();
    let matched = CAPACITY_MARKERS
        .iter()
        .any(|marker| body_lower.contains(marker));
    if !matched {
        tracing::warn!(
            status = p.status,
            body = %p.body,
            "unclassified 409/412 — not treated as capacity exhaustion; tune CAPACITY_MARKERS if this recurs"
        );
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(status: u16, body: &str) -> ClientError {
        ClientError::Provider(ProviderError::new(status, body))
    }

    #[test]
    fn classifies_404_as_not_found() {
        assert!(not_found(&err(404, "{}")));
        assert!(!not_found(&err(409, "{}")));
    }

    #[test]
    fn classifies_capacity_markers_case_insensitively() {
        assert!(insufficient_resources(&err(
            409,
            r#"{"error":"Insufficient Resources to place machine"}"#
        )));
        assert!(insufficient_resources(&err(
            412,
            r#"{"error":"insufficient memory available in region"}"#
        )));
    }

    #[test]
    fn does_not_classify_version_mismatch_as_capacity() {
        assert!(!insufficient_resources(&err(
            412,
            r#"{"error":"min_secrets_version 3 is not yet available"}"#
        )));
    }

    #[test]
    fn does_not_classify_unrelated_5xx() {
        assert!(!insufficient_resources(&err(500, "internal error")));
    }
}
