use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::escrowdb::TransactionExt,
    dtos::{validation_error, ApiResponse, PaginatedResponse, RequestQueryDto},
    error::HttpError,
    middleware::{
        rate_limit::{rate_limit_middleware, webhook_rate_limiter},
        JWTAuthMiddeware,
    },
    service::payment_provider::{verify_webhook_signature, GatewayEvent},
    AppState,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn transactions_handler() -> Router {
    Router::new()
        .route("/", get(get_my_transactions))
        .route("/:transaction_id", get(get_transaction))
}

/// Public: authenticated by the gateway signature, not by a user token.
pub fn payments_handler(trust_proxy: bool) -> Router {
    let limiter = Arc::new(webhook_rate_limiter(trust_proxy));

    Router::new().route(
        "/webhook",
        post(payment_webhook).layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        )),
    )
}

pub async fn get_my_transactions(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Query(query): Query<RequestQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let transactions = app_state
        .db_client
        .get_user_transactions(user.user.id, query.page(), query.limit())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;
    let total = app_state
        .db_client
        .count_user_transactions(user.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(PaginatedResponse::new(
        transactions,
        total,
        query.page(),
        query.limit() as u32,
    )))
}

pub async fn get_transaction(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let transaction = app_state
        .db_client
        .get_transaction(transaction_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Transaction not found"))?;

    if !transaction.involves(user.user.id) && !user.user.is_admin() {
        return Err(HttpError::forbidden("You are not part of this transaction"));
    }

    Ok(Json(ApiResponse::success("Transaction retrieved", transaction)))
}

/// Gateway callback. Only a bad signature or an unreadable body is refused;
/// events that cannot be applied are logged and acknowledged so the gateway
/// stops retrying them.
pub async fn payment_webhook(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| HttpError::bad_request("Missing webhook signature"))?;

    verify_webhook_signature(
        &body,
        signature,
        &app_state.env.stripe_webhook_secret,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!("Rejected payment webhook: {}", e);
        HttpError::bad_request("Invalid webhook signature")
    })?;

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| HttpError::bad_request(format!("Invalid webhook payload: {}", e)))?;

    tracing::info!("Payment webhook {} ({})", event.id, event.event_type);

    match app_state.escrow_service.apply_gateway_event(&event).await {
        Ok(Some(transaction)) => {
            app_state
                .notification_service
                .push_payment_update(&transaction)
                .await;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to apply webhook {}: {}", event.id, e);
            return Err(HttpError::server_error("Failed to process webhook"));
        }
    }

    Ok(Json(json!({ "status": "success" })))
}
