use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::instrument;

use kiloclaw_core::models::wire::{
    ProvisionRequest, ProvisionResponse, StatusQuery, StatusResponse, SuccessResponse, UserScopedRequest,
};
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
pub async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<ProvisionResponse>)> {
    require_user_id(&req.user_id)?;
    let user_id = req.user_id.clone();
    let controller = state.instance_controller(&user_id);
    let outcome = controller.provision(req.into_config()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProvisionResponse { sandbox_id: outcome.sandbox_id }),
    ))
}

#[instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn start(State(state): State<AppState>, Json(req): Json<UserScopedRequest>) -> Result<Json<SuccessResponse>> {
    require_user_id(&req.user_id)?;
    let controller = state.instance_controller(&req.user_id);
    controller.start().await?;
    Ok(Json(SuccessResponse { ok: true }))
}

#[instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn stop(State(state): State<AppState>, Json(req): Json<UserScopedRequest>) -> Result<Json<SuccessResponse>> {
    require_user_id(&req.user_id)?;
    let controller = state.instance_controller(&req.user_id);
    controller.stop().await?;
    Ok(Json(SuccessResponse { ok: true }))
}

#[instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn destroy(State(state): State<AppState>, Json(req): Json<UserScopedRequest>) -> Result<Json<SuccessResponse>> {
    require_user_id(&req.user_id)?;
    let controller = state.instance_controller(&req.user_id);
    controller.destroy().await?;
    Ok(Json(SuccessResponse { ok: true }))
}

#[instrument(skip(state, query), fields(user_id = %query.user_id))]
pub async fn status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Result<Json<StatusResponse>> {
    require_user_id(&query.user_id)?;
    let controller = state.instance_controller(&query.user_id);
    let view = controller.get_status().await?;
    let view = view.ok_or_else(|| ApiError::from(CoreError::NotFound(query.user_id.clone())))?;
    Ok(Json(StatusResponse::from(view)))
}
