use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::post,
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use redis::aio::ConnectionManager;
use validator::Validate;

use crate::{
    db::userdb::UserExt,
    dtos::{
        userdtos::{FilterUserDto, LoginUserDto, RegisterUserDto, UserLoginResponseDto},
        validation_error, ApiResponse,
    },
    error::{ErrorMessage, HttpError},
    middleware::{
        main_middleware::{blacklist_key, extract_token},
        rate_limit::{login_rate_limiter, rate_limit_middleware},
    },
    utils::{password, token},
    AppState,
};

pub fn auth_handler(trust_proxy: bool) -> Router {
    let login_limiter = Arc::new(login_rate_limiter(trust_proxy));

    Router::new()
        .route("/register", post(register))
        .route(
            "/login",
            post(login).layer(middleware::from_fn_with_state(
                login_limiter,
                rate_limit_middleware,
            )),
        )
        .route("/logout", post(logout))
}

fn token_cookie(token: String, max_age_minutes: i64) -> Cookie<'static> {
    Cookie::build(("token", token))
        .path("/")
        .max_age(time::Duration::minutes(max_age_minutes))
        .same_site(SameSite::Lax)
        .http_only(true)
        .build()
}

pub async fn register(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<RegisterUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let hashed_password =
        password::hash(&body.password).map_err(|e| HttpError::server_error(e.to_string()))?;

    let result = app_state
        .db_client
        .save_user(
            body.name.trim().to_string(),
            body.email.trim().to_lowercase(),
            hashed_password,
            body.role,
        )
        .await;

    match result {
        Ok(user) => {
            tracing::info!("Registered {} user {}", user.role.to_str(), user.id);
            Ok((
                StatusCode::CREATED,
                Json(ApiResponse::success(
                    "Registration successful",
                    FilterUserDto::filter_user(&user),
                )),
            ))
        }
        Err(sqlx::Error::Database(db_err)) => {
            if db_err.is_unique_violation() {
                Err(HttpError::unique_constraint_violation(
                    ErrorMessage::EmailExist.to_string(),
                ))
            } else {
                Err(HttpError::server_error(db_err.to_string()))
            }
        }
        Err(e) => Err(HttpError::server_error(e.to_string())),
    }
}

pub async fn login(
    Extension(app_state): Extension<Arc<AppState>>,
    Json(body): Json<LoginUserDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate().map_err(validation_error)?;

    let email = body.email.trim().to_lowercase();
    let user = app_state
        .db_client
        .get_user(None, Some(&email))
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::bad_request(ErrorMessage::WrongCredentials.to_string()))?;

    let password_matched = password::compare(&body.password, &user.password)
        .map_err(|_| HttpError::bad_request(ErrorMessage::WrongCredentials.to_string()))?;

    if !password_matched {
        return Err(HttpError::bad_request(ErrorMessage::WrongCredentials.to_string()));
    }

    if !user.is_active {
        return Err(HttpError::forbidden(ErrorMessage::UserDeactivated.to_string()));
    }

    let token = token::create_token(
        &user.id.to_string(),
        app_state.env.jwt_secret.as_bytes(),
        app_state.env.jwt_maxage,
    )
    .map_err(|e| HttpError::server_error(e.to_string()))?;

    let cookie = token_cookie(token.clone(), app_state.env.jwt_maxage);

    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        cookie
            .to_string()
            .parse()
            .map_err(|_| HttpError::server_error(ErrorMessage::ServerError.to_string()))?,
    );

    let response = Json(UserLoginResponseDto {
        status: "success".to_string(),
        token,
    });

    Ok((headers, response))
}

/// Clears the cookie and, with Redis available, revokes the token until it expires.
pub async fn logout(
    Extension(app_state): Extension<Arc<AppState>>,
    cookie_jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    if let Some(token) = extract_token(&cookie_jar, &headers) {
        if let Some(redis_client) = &app_state.db_client.redis_client {
            let mut conn = ConnectionManager::clone(redis_client);
            let ttl_secs = (app_state.env.jwt_maxage.max(1) * 60) as usize;
            let revoked: Result<(), redis::RedisError> = redis::cmd("SET")
                .arg(blacklist_key(&token))
                .arg(1)
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await;
            if let Err(e) = revoked {
                tracing::warn!("Failed to revoke token on logout: {}", e);
            }
        }
    }

    let cookie = token_cookie(String::new(), 0);
    let mut response_headers = HeaderMap::new();
    response_headers.append(
        header::SET_COOKIE,
        cookie
            .to_string()
            .parse()
            .map_err(|_| HttpError::server_error(ErrorMessage::ServerError.to_string()))?,
    );

    Ok((response_headers, Json(ApiResponse::message("Logged out"))))
}
