use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        disputedtos::{CreateDisputeDto, DisputeMessageDto},
        validation_error, ApiResponse,
    },
    error::HttpError,
    middleware::JWTAuthMiddeware,
    utils::sanitize::plain_text,
    AppState,
};

pub fn disputes_handler() -> Router {
    Router::new()
        .route("/:dispute_id", get(get_dispute))
        .route(
            "/:dispute_id/messages",
            get(get_dispute_messages).post(add_dispute_message),
        )
}

/// Mounted under `/contracts/:contract_id/disputes`.
pub async fn create_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<CreateDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let dispute = app_state
        .dispute_service
        .create_dispute(
            contract_id,
            user.user.id,
            body.transaction_id,
            body.reason.trim().to_string(),
            body.description,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            "Dispute opened; automatic payouts on this contract are paused",
            dispute,
        )),
    ))
}

pub async fn get_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(dispute_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let dispute = app_state
        .dispute_service
        .get_dispute(dispute_id, &user.user)
        .await?;

    Ok(Json(ApiResponse::success("Dispute retrieved", dispute)))
}

pub async fn get_dispute_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(dispute_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let messages = app_state
        .dispute_service
        .get_messages(dispute_id, &user.user)
        .await?;

    Ok(Json(ApiResponse::success("Messages retrieved", messages)))
}

pub async fn add_dispute_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(dispute_id): Path<Uuid>,
    Json(body): Json<DisputeMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let message = app_state
        .dispute_service
        .add_message(dispute_id, &user.user, plain_text(&body.message))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Message added", message)),
    ))
}
