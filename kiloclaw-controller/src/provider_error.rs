//! Maps `kiloclaw_provider::ClientError` onto the shared `kiloclaw_core::Error`
//! taxonomy (spec §7). Lives here rather than in either crate directly: it
//! would otherwise require an orphan impl, since neither crate owns both
//! types.

use kiloclaw_core::Error;
use kiloclaw_provider::{insufficient_resources, not_found, ClientError};

pub fn classify(err: ClientError) -> Error {
    if not_found(&err) {
        return Error::NotFound(err.to_string());
    }
    if insufficient_resources(&err) {
        return Error::InsufficientResources(err.to_string());
    }
    match err {
        ClientError::AppNameCollision {
            app_name,
            requesting_user_id,
        } => Error::AppNameCollision {
            app_name,
            requesting_user_id,
        },
        ClientError::Provider(p) if p.status == 409 || p.status == 412 => {
            Error::PreconditionFailed(p.to_string())
        }
        ClientError::Provider(p) if p.status >= 500 => Error::Transient(p.to_string()),
        ClientError::Transport(e) => Error::Transient(e.to_string()),
        other => Error::Internal(other.to_string()),
    }
}

/// `true` iff `err` is a not-found-equivalent failure (the remote resource is
/// already gone) — used pervasively for delete-is-idempotent logic.
pub fn is_not_found(err: &ClientError) -> bool {
    not_found(err)
}

/// `true` iff `err` classifies as capacity exhaustion.
pub fn is_insufficient_resources(err: &ClientError) -> bool {
    insufficient_resources(err)
}
