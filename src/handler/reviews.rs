use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, response::IntoResponse, Extension, Json};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{reviewdtos::CreateReviewDto, validation_error, ApiResponse},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    utils::sanitize::plain_text,
    AppState,
};

/// Mounted under `/contracts/:contract_id/reviews`.
pub async fn create_review(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(contract_id): Path<Uuid>,
    Json(body): Json<CreateReviewDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let submitted = app_state
        .review_service
        .submit_review(
            contract_id,
            user.user.id,
            body.rating,
            plain_text(&body.comment),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success("Review submitted", submitted)),
    ))
}

/// Mounted under `/users/:user_id/reviews`.
pub async fn get_user_reviews(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let reviews = app_state.review_service.user_reviews(user_id).await?;

    Ok(Json(ApiResponse::success("Reviews retrieved", reviews)))
}
