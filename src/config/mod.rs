//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod stage;

pub use stage::StageConfig;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::time::Duration;

/// Default window during which a freshly started stage counts as "recently run".
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Recently-run tolerance applied when a stage does not set its own.
    pub flag_tolerance: Duration,
    /// Per-call store timeout. `None` leaves calls unbounded.
    pub store_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            flag_tolerance: optional_u64("FLAG_TOLERANCE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TOLERANCE),
            store_timeout: optional_u64("STORE_TIMEOUT_MS")?.map(Duration::from_millis),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name} must be a whole number, got {raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
