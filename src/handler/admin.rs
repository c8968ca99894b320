use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        analyticsdb::{AnalyticsExt, PlatformAnalytics},
        cache::{CacheHelper, ANALYTICS_CACHE_TTL, ANALYTICS_KEY},
    },
    dtos::{
        disputedtos::{DisputeQueryDto, ResolveDisputeDto},
        validation_error, ApiResponse, PaginatedResponse, DEFAULT_PAGE_SIZE,
    },
    error::HttpError,
    middleware::JWTAuthMiddeware,
    AppState,
};

/// Every route here sits behind the admin role check in `routes.rs`.
pub fn admin_handler() -> Router {
    Router::new()
        .route("/analytics", get(get_analytics))
        .route("/disputes", get(get_disputes))
        .route("/disputes/:dispute_id/review", put(start_dispute_review))
        .route("/disputes/:dispute_id/resolve", put(resolve_dispute))
}

pub async fn get_analytics(
    Extension(app_state): Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, HttpError> {
    let redis = app_state.db_client.redis_client.as_ref();

    if let Some(cached) = CacheHelper::get_optional::<PlatformAnalytics>(redis, ANALYTICS_KEY).await {
        return Ok(Json(ApiResponse::success("Analytics retrieved", cached)));
    }

    let analytics = app_state
        .db_client
        .get_platform_analytics()
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    CacheHelper::set_optional(redis, ANALYTICS_KEY, &analytics, ANALYTICS_CACHE_TTL).await;

    Ok(Json(ApiResponse::success("Analytics retrieved", analytics)))
}

pub async fn get_disputes(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<DisputeQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let page = query.page.unwrap_or(1).max(1) as u32;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let (disputes, total) = app_state
        .dispute_service
        .list_disputes(query.status, page, limit)
        .await?;

    Ok(Json(PaginatedResponse::new(
        disputes,
        total,
        page,
        limit as u32,
    )))
}

pub async fn start_dispute_review(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(admin): Extension<JWTAuthMiddeware>,
    Path(dispute_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let dispute = app_state
        .dispute_service
        .start_review(dispute_id, admin.user.id)
        .await?;

    Ok(Json(ApiResponse::success("Dispute under review", dispute)))
}

pub async fn resolve_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(admin): Extension<JWTAuthMiddeware>,
    Path(dispute_id): Path<Uuid>,
    Json(body): Json<ResolveDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let settlement = app_state
        .dispute_service
        .resolve_dispute(dispute_id, admin.user.id, body.resolution, body.notes)
        .await?;

    CacheHelper::invalidate(
        app_state.db_client.redis_client.as_ref(),
        &[ANALYTICS_KEY.to_string()],
    )
    .await;

    let message = if settlement.funds.errors.is_empty() {
        "Dispute resolved"
    } else {
        "Dispute resolved; some payments need attention"
    };

    Ok(Json(ApiResponse::success(message, settlement)))
}
