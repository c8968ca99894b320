mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use config::Config;
use db::DBClient;
use dotenv::dotenv;
use routes::create_router;
use service::{
    background_jobs::start_escrow_release_job,
    contract_service::ContractService,
    dispute_service::DisputeService,
    escrow_service::EscrowService,
    notification_service::NotificationService,
    payment_provider::{PaymentGateway, StripeGateway},
    realtime::RealtimeHub,
    review_service::ReviewService,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    pub realtime: Arc<RealtimeHub>,
    // Services
    pub notification_service: Arc<NotificationService>,
    pub escrow_service: Arc<EscrowService>,
    pub contract_service: Arc<ContractService>,
    pub dispute_service: Arc<DisputeService>,
    pub review_service: Arc<ReviewService>,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(&config));
        Self::with_gateway(db_client, config, gateway)
    }

    pub fn with_gateway(
        db_client: DBClient,
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let db_client_arc = Arc::new(db_client);
        let realtime = Arc::new(RealtimeHub::new());

        let notification_service = Arc::new(NotificationService::new(
            db_client_arc.clone(),
            realtime.clone(),
        ));
        let escrow_service = Arc::new(EscrowService::new(
            db_client_arc.clone(),
            gateway,
            &config,
        ));

        let contract_service = Arc::new(ContractService::new(
            db_client_arc.clone(),
            escrow_service.clone(),
            notification_service.clone(),
        ));

        let dispute_service = Arc::new(DisputeService::new(
            db_client_arc.clone(),
            escrow_service.clone(),
            notification_service.clone(),
        ));

        let review_service = Arc::new(ReviewService::new(
            db_client_arc.clone(),
            notification_service.clone(),
        ));

        Self {
            env: config,
            db_client: db_client_arc,
            realtime,
            notification_service,
            escrow_service,
            contract_service,
            dispute_service,
            review_service,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match Config::init() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!("Connection to the database is successful");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    let db_client = match config.redis_url {
        Some(ref redis_url) => DBClient::with_redis(pool, redis_url).await,
        None => {
            tracing::info!("Redis not configured, running without cache");
            DBClient::new(pool)
        }
    };

    let allowed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);

    let app_state = Arc::new(AppState::new(db_client, config.clone()));

    tokio::spawn(start_escrow_release_job(app_state.clone()));

    let app = create_router(app_state.clone()).layer(cors);

    tracing::info!("Server is running on http://localhost:{}", config.port);
    tracing::info!("Cache status: {}", app_state.db_client.cache_status());

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind port {}: {}", config.port, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Server error: {}", err);
    }
}
