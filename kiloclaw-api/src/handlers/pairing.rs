use axum::extract::State;
use axum::Json;
use tracing::instrument;

use kiloclaw_core::models::wire::{PairingApproveRequest, PairingListResponse, SuccessResponse, UserScopedRequest};
use kiloclaw_core::Error as CoreError;

use crate::error::{ApiError, Result};
use crate::state::AppState;

fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(ApiError::from(CoreError::InvalidArgument(
            "userId must not be empty".to_string(),
        )));
    }
    Ok(())
}

#[instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn list(
    State(state): State<AppState>,
    Json(req): Json<UserScopedRequest>,
) -> Result<Json<PairingListResponse>> {
    require_user_id(&req.user_id)?;
    let controller = state.instance_controller(&req.user_id);
    let result = controller.pairing_list().await?;
    Ok(Json(PairingListResponse { result }))
}

#[instrument(skip(state, req), fields(user_id = %req.user_id, channel = %req.channel))]
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<PairingApproveRequest>,
) -> Result<Json<SuccessResponse>> {
    require_user_id(&req.user_id)?;
    let controller = state.instance_controller(&req.user_id);
    controller.pairing_approve(&req.channel, &req.code).await?;
    Ok(Json(SuccessResponse { ok: true }))
}
