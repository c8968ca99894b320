use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use uuid::Uuid;

use crate::{
    db::notificationdb::NotificationExt,
    dtos::{chatdtos::NotificationQueryDto, ApiResponse, PaginatedResponse},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    AppState,
};

const MAX_NOTIFICATION_PAGE: i64 = 100;

pub fn notification_routes() -> Router {
    Router::new()
        .route("/", get(get_user_notifications))
        .route("/read-all", put(mark_all_notifications_read))
        .route("/unread-count", get(get_unread_count))
        .route("/:notification_id/read", put(mark_notification_read))
}

async fn get_user_notifications(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(query): Query<NotificationQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    let limit = query.limit.unwrap_or(20).clamp(1, MAX_NOTIFICATION_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let notifications = app_state
        .db_client
        .get_user_notifications(auth.user.id, query.unread_only, limit, offset)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;
    let total = app_state
        .db_client
        .count_user_notifications(auth.user.id, query.unread_only)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let page = (offset / limit) as u32 + 1;
    Ok(Json(PaginatedResponse::new(
        notifications,
        total,
        page,
        limit as u32,
    )))
}

async fn mark_notification_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(notification_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let notification = app_state
        .db_client
        .mark_notification_read(notification_id, auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Notification not found"))?;

    Ok(Json(ApiResponse::success(
        "Notification marked as read",
        notification,
    )))
}

async fn mark_all_notifications_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let updated = app_state
        .db_client
        .mark_all_notifications_read(auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(
        "All notifications marked as read",
        serde_json::json!({ "updated": updated }),
    )))
}

async fn get_unread_count(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let count = app_state
        .db_client
        .count_user_notifications(auth.user.id, true)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(
        "Unread count retrieved",
        serde_json::json!({ "unread_count": count }),
    )))
}
