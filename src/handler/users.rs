use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    middleware,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::{
        cache::{user_profile_key, CacheHelper, USER_PROFILE_TTL},
        userdb::UserExt,
    },
    dtos::{
        userdtos::{
            ActiveUpdateDto, FilterUserDto, MeDto, PayoutAccountDto, RoleUpdateDto,
            UpdateProfileDto,
        },
        validation_error, ApiResponse, PaginatedResponse, RequestQueryDto,
    },
    error::HttpError,
    handler::reviews::get_user_reviews,
    middleware::{role_check, JWTAuthMiddeware},
    models::usermodel::UserRole,
    utils::currency::money_from_f64,
    AppState,
};

pub fn users_handler() -> Router {
    Router::new()
        .route("/me", get(get_me).put(update_me))
        .route("/me/payout-account", put(update_payout_account))
        .route(
            "/",
            get(get_users).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
        .route("/:user_id", get(get_user_profile))
        .route("/:user_id/reviews", get(get_user_reviews))
        .route(
            "/:user_id/role",
            put(update_user_role).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
        .route(
            "/:user_id/active",
            put(set_user_active).layer(middleware::from_fn(|req, next| {
                role_check(req, next, vec![UserRole::Admin])
            })),
        )
}

async fn invalidate_profile(app_state: &AppState, user_id: Uuid) {
    CacheHelper::invalidate(
        app_state.db_client.redis_client.as_ref(),
        &[user_profile_key(user_id)],
    )
    .await;
}

pub async fn get_me(
    Extension(user): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    Ok(Json(ApiResponse::success(
        "Profile retrieved",
        MeDto::from_user(&user.user),
    )))
}

pub async fn update_me(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Json(body): Json<UpdateProfileDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let hourly_rate = body
        .hourly_rate
        .map(money_from_f64)
        .transpose()
        .map_err(HttpError::bad_request)?;

    let updated = app_state
        .db_client
        .update_user_profile(
            user.user.id,
            body.name,
            body.bio,
            body.skills,
            hourly_rate,
            body.avatar_url,
        )
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    invalidate_profile(&app_state, updated.id).await;

    Ok(Json(ApiResponse::success(
        "Profile updated",
        MeDto::from_user(&updated),
    )))
}

/// Connected account the escrow release job pays this user into.
pub async fn update_payout_account(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(user): Extension<JWTAuthMiddeware>,
    Json(body): Json<PayoutAccountDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let updated = app_state
        .db_client
        .update_payout_account(user.user.id, body.account_id.trim().to_string())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    tracing::info!("Payout account updated for user {}", updated.id);

    Ok(Json(ApiResponse::success(
        "Payout account saved",
        MeDto::from_user(&updated),
    )))
}

pub async fn get_user_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let redis = app_state.db_client.redis_client.as_ref();
    let key = user_profile_key(user_id);

    if let Some(cached) = CacheHelper::get_optional::<FilterUserDto>(redis, &key).await {
        return Ok(Json(ApiResponse::success("User retrieved", cached)));
    }

    let user = app_state
        .db_client
        .get_user(Some(user_id), None)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .filter(|u| u.is_active)
        .ok_or_else(|| HttpError::not_found("User not found"))?;

    let profile = FilterUserDto::filter_user(&user);
    CacheHelper::set_optional(redis, &key, &profile, USER_PROFILE_TTL).await;

    Ok(Json(ApiResponse::success("User retrieved", profile)))
}

pub async fn get_users(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(query): Query<RequestQueryDto>,
) -> Result<impl IntoResponse, HttpError> {
    query.validate().map_err(validation_error)?;

    let users = app_state
        .db_client
        .get_users(query.page(), query.limit())
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let total = app_state
        .db_client
        .get_user_count()
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let users: Vec<MeDto> = users.iter().map(MeDto::from_user).collect();

    Ok(Json(PaginatedResponse::new(
        users,
        total,
        query.page(),
        query.limit() as u32,
    )))
}

pub async fn update_user_role(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(admin): Extension<JWTAuthMiddeware>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<RoleUpdateDto>,
) -> Result<impl IntoResponse, HttpError> {
    if admin.user.id == user_id {
        return Err(HttpError::bad_request("You cannot change your own role"));
    }

    let updated = app_state
        .db_client
        .update_user_role(user_id, body.role)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => HttpError::not_found("User not found"),
            other => HttpError::server_error(other.to_string()),
        })?;

    invalidate_profile(&app_state, user_id).await;
    tracing::info!(
        "Admin {} set role of {} to {}",
        admin.user.id,
        user_id,
        updated.role.to_str()
    );

    Ok(Json(ApiResponse::success(
        "Role updated",
        MeDto::from_user(&updated),
    )))
}

pub async fn set_user_active(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(admin): Extension<JWTAuthMiddeware>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<ActiveUpdateDto>,
) -> Result<impl IntoResponse, HttpError> {
    if admin.user.id == user_id {
        return Err(HttpError::bad_request("You cannot deactivate yourself"));
    }

    let updated = app_state
        .db_client
        .set_user_active(user_id, body.is_active)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => HttpError::not_found("User not found"),
            other => HttpError::server_error(other.to_string()),
        })?;

    invalidate_profile(&app_state, user_id).await;
    tracing::info!(
        "Admin {} set active={} on user {}",
        admin.user.id,
        body.is_active,
        user_id
    );

    Ok(Json(ApiResponse::success(
        "User status updated",
        MeDto::from_user(&updated),
    )))
}
