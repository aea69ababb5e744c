//! services/api/src/bin/api.rs

use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use pawtrack_api::{
    adapters::{DbAdapter, MemoryStore},
    config::Config,
    error::ApiError,
    web::{self, middleware::USER_ID_HEADER, rest::ApiDoc, AppState},
};
use pawtrack_core::ports::{EntitlementService, FamilyStore, SystemClock, WalkRepository};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

type Storage = (
    Arc<dyn FamilyStore>,
    Arc<dyn WalkRepository>,
    Arc<dyn EntitlementService>,
);

/// Connects to Postgres when configured, otherwise falls back to the in-memory store.
async fn connect_storage(config: &Config) -> Result<Storage, ApiError> {
    match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            let store: Arc<dyn FamilyStore> = db_adapter.clone();
            let walks: Arc<dyn WalkRepository> = db_adapter.clone();
            let entitlements: Arc<dyn EntitlementService> = db_adapter;
            Ok((store, walks, entitlements))
        }
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store. Data is lost on restart.");
            let memory = Arc::new(MemoryStore::new());
            let store: Arc<dyn FamilyStore> = memory.clone();
            let walks: Arc<dyn WalkRepository> = memory.clone();
            let entitlements: Arc<dyn EntitlementService> = memory;
            Ok((store, walks, entitlements))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect Storage ---
    let (store, walks, entitlements) = connect_storage(&config).await?;

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(
        config.join_policy,
        store,
        walks,
        entitlements,
        Arc::new(SystemClock),
    ));
    info!(join_policy = ?config.join_policy, "Core services ready.");

    // --- 4. Create the Web Router ---
    let allowed_origin = config.cors_allowed_origin.parse::<HeaderValue>()?;
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = web::router(app_state)
        .layer(cors)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
