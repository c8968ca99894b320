use std::sync::Arc;

use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{
        admin::admin_handler,
        auth::auth_handler,
        chat::chat_handler,
        contracts::contracts_handler,
        disputes::disputes_handler,
        notification_handler::notification_routes,
        payments::{payments_handler, transactions_handler},
        projects::{projects_handler, proposals_handler},
        realtime::socket_handler,
        support_handler::support_handler,
        users::users_handler,
    },
    middleware::{auth, role_check},
    models::usermodel::UserRole,
    AppState,
};

async fn health_check(Extension(app_state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "cache": app_state.db_client.cache_status(),
        "sockets": app_state.realtime.connection_count().await,
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_route = Router::new()
        .nest("/auth", auth_handler(app_state.env.trust_proxy))
        .nest("/users", users_handler().layer(middleware::from_fn(auth)))
        .nest("/projects", projects_handler().layer(middleware::from_fn(auth)))
        .nest("/proposals", proposals_handler().layer(middleware::from_fn(auth)))
        .nest("/contracts", contracts_handler().layer(middleware::from_fn(auth)))
        .nest("/disputes", disputes_handler().layer(middleware::from_fn(auth)))
        .nest(
            "/transactions",
            transactions_handler().layer(middleware::from_fn(auth)),
        )
        .nest("/payments", payments_handler(app_state.env.trust_proxy))
        .nest(
            "/conversations",
            chat_handler().layer(middleware::from_fn(auth)),
        )
        .nest(
            "/notifications",
            notification_routes().layer(middleware::from_fn(auth)),
        )
        .nest("/support", support_handler().layer(middleware::from_fn(auth)))
        .nest(
            "/admin",
            admin_handler()
                .layer(middleware::from_fn(|req, next| {
                    role_check(req, next, vec![UserRole::Admin])
                }))
                .layer(middleware::from_fn(auth)),
        )
        .nest("/ws", socket_handler());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::payment_provider::mock::MockGateway;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/talenthive_test".to_string()),
            "JWT_SECRET_KEY" => Some("test-secret".to_string()),
            _ => None,
        })
        .unwrap();
        // never connects unless a handler reaches the database
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        Arc::new(AppState::with_gateway(
            crate::db::DBClient::new(pool),
            config,
            Arc::new(MockGateway::default()),
        ))
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_token() {
        let app = create_router(test_state());
        for uri in ["/api/users/me", "/api/contracts", "/api/admin/analytics"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_webhook_rejects_unsigned_calls() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/payments/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_socket_needs_a_token() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(response.status().is_client_error());
    }
}
