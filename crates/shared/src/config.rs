use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_bool_env, parse_i32_env, parse_u32_env, parse_u64_env,
    parse_u64_list_env, require_env,
};
use crate::retry_policy::{DEFAULT_BACKOFF_SECONDS, RetryPolicy};

const DEFAULT_TICK_SECONDS: u64 = 60;
const DEFAULT_ERROR_BACKOFF_SECONDS: u64 = 300;
const DEFAULT_MAX_RETRIES: i32 = 5;
const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_PROCESSOR_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_PROCESSING_LEASE_SECONDS: u64 = 900;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_seconds: u64,
    pub error_backoff_seconds: u64,
    /// Ceiling stamped on newly ingested webhook records.
    pub max_retries: i32,
    pub retry_policy: RetryPolicy,
    pub batch_size: u32,
    pub processor_timeout_seconds: u64,
    pub processing_lease_seconds: u64,
    pub database_url: String,
    pub database_max_connections: u32,
    pub migrations_dir: PathBuf,
    pub run_migrations: bool,
    pub payment_service_url: String,
    pub payment_service_auth_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    Dotenv(String),
}

/// Loads `.env` from the working directory or a parent. A missing file is fine;
/// a file that cannot be read or parsed is an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    dotenv_result(dotenvy::dotenv().map(|_| ()))
}

fn dotenv_result(result: Result<(), dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::Dotenv(err.to_string())),
    }
}

fn retry_policy_from_seconds(seconds: &[u64]) -> Result<RetryPolicy, ConfigError> {
    RetryPolicy::from_seconds(seconds).map_err(|err| {
        ConfigError::InvalidConfiguration(format!("WEBHOOK_BACKOFF_SECONDS: {err}"))
    })
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backoff_seconds =
            parse_u64_list_env("WEBHOOK_BACKOFF_SECONDS", &DEFAULT_BACKOFF_SECONDS)?;
        let retry_policy = retry_policy_from_seconds(&backoff_seconds)?;

        let config = Self {
            tick_seconds: parse_u64_env("WEBHOOK_TICK_SECONDS", DEFAULT_TICK_SECONDS)?,
            error_backoff_seconds: parse_u64_env(
                "WEBHOOK_ERROR_BACKOFF_SECONDS",
                DEFAULT_ERROR_BACKOFF_SECONDS,
            )?,
            max_retries: parse_i32_env("WEBHOOK_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_policy,
            batch_size: parse_u32_env("WEBHOOK_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            processor_timeout_seconds: parse_u64_env(
                "WEBHOOK_PROCESSOR_TIMEOUT_SECONDS",
                DEFAULT_PROCESSOR_TIMEOUT_SECONDS,
            )?,
            processing_lease_seconds: parse_u64_env(
                "WEBHOOK_PROCESSING_LEASE_SECONDS",
                DEFAULT_PROCESSING_LEASE_SECONDS,
            )?,
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_u32_env("DATABASE_MAX_CONNECTIONS", 5)?,
            migrations_dir: optional_trimmed_env("MIGRATIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("db/migrations")),
            run_migrations: parse_bool_env("RUN_MIGRATIONS", false)?,
            payment_service_url: require_env("PAYMENT_SERVICE_URL")?,
            payment_service_auth_token: optional_trimmed_env("PAYMENT_SERVICE_AUTH_TOKEN"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_TICK_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.error_backoff_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_ERROR_BACKOFF_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.max_retries <= 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_MAX_RETRIES must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.processor_timeout_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_PROCESSOR_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.processing_lease_seconds <= self.processor_timeout_seconds {
            return Err(ConfigError::InvalidConfiguration(
                "WEBHOOK_PROCESSING_LEASE_SECONDS must exceed WEBHOOK_PROCESSOR_TIMEOUT_SECONDS"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_seconds)
    }

    pub fn processing_lease(&self) -> Duration {
        Duration::from_secs(self.processing_lease_seconds)
    }
}
