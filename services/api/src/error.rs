//! services/api/src/error.rs
//!
//! Startup and serving failures of the `pawtrack-api` binary. Request-level failures
//! never reach this type; the handlers turn them into HTTP responses.

use crate::config::ConfigError;
use axum::http::header::InvalidHeaderValue;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("CORS_ALLOWED_ORIGIN is not a valid origin: {0}")]
    InvalidOrigin(#[from] InvalidHeaderValue),

    /// Connecting the pool to `DATABASE_URL` failed.
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Binding the listener or serving connections failed.
    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),
}
