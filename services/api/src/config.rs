//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use pawtrack_core::JoinPolicy;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub join_policy: JoinPolicy,
    pub cors_allowed_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            db_max_connections: 5,
            log_level: Level::INFO,
            join_policy: JoinPolicy::Strict,
            cors_allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

pub fn parse_join_policy(value: &str) -> Result<JoinPolicy, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "strict" => Ok(JoinPolicy::Strict),
        "sole-member" | "sole_member" => Ok(JoinPolicy::SoleMember),
        other => Err(ConfigError::InvalidValue(
            "JOIN_POLICY".to_string(),
            format!("'{}' is not one of 'strict', 'sole-member'", other),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // --- Server Settings ---
        let bind_address = match lookup("BIND_ADDRESS") {
            Some(value) => value.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
            })?,
            None => defaults.bind_address,
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_allowed_origin =
            lookup("CORS_ALLOWED_ORIGIN").unwrap_or(defaults.cors_allowed_origin);

        // --- Storage Settings ---
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string(), e.to_string())
            })?,
            None => defaults.db_max_connections,
        };

        // --- Domain Settings ---
        let join_policy = match lookup("JOIN_POLICY") {
            Some(value) => parse_join_policy(&value)?,
            None => defaults.join_policy,
        };

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            join_policy,
            cors_allowed_origin,
        })
    }
}
