use thiserror::Error;

/// Domain-level errors shared by every crate in the workspace.
///
/// Crate-specific error kinds (provider HTTP errors, controller reconciler
/// errors) wrap or convert into this enum at their public boundary so that
/// `kiloclaw-api` has a single error surface to translate into HTTP.
#[derive(Error, Debug)]
pub enum Error {
    #[error("user id mismatch: instance is bound to a different user")]
    UserIdMismatch,

    #[error("instance is being destroyed and cannot accept new work")]
    Destroying,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("app name collision: {app_name} is already owned by a different user")]
    AppNameCollision {
        app_name: String,
        requesting_user_id: String,
    },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("provider reported insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("transient error, retry later: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
