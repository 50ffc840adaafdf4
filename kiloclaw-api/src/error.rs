use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kiloclaw_core::Error as CoreError;
use serde_json::json;

/// Maps the shared `kiloclaw_core::Error` taxonomy onto HTTP per spec §7/§4.4.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(CoreError::Internal(err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self.0 {
            CoreError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, format!("not found: {msg}")),
            CoreError::Destroying => (
                StatusCode::CONFLICT,
                "instance is being destroyed and cannot accept new work".to_string(),
            ),
            CoreError::PreconditionFailed(msg) => (StatusCode::CONFLICT, msg.clone()),
            CoreError::InsufficientResources(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, format!("insufficient resources: {msg}"))
            }
            CoreError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            CoreError::AppNameCollision { app_name, requesting_user_id } => {
                tracing::error!(
                    app_name = %app_name,
                    requesting_user_id = %requesting_user_id,
                    "app name collision, needs operator investigation"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("app name collision: {app_name} is already owned by a different user"),
                )
            }
            CoreError::UserIdMismatch => {
                tracing::error!("user id mismatch reached the API boundary, likely a routing bug");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            CoreError::Storage(msg) => (StatusCode::INTERNAL_SERVER_ERROR, format!("storage error: {msg}")),
            CoreError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, format!("internal error: {msg}")),
            CoreError::Anyhow(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("internal error: {err}")),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
