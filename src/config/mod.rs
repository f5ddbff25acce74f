//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on missing or malformed values.
//! Connection strings are wrapped in secrecy::SecretString to prevent log leaks.
//! Engine settings can also come from a TOML file.

pub mod secrets;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use self::secrets::SecretString;
use serde::Deserialize;

use crate::engine::{DEFAULT_CAPACITY, EngineBuilder, RetryPolicy};
use crate::error::{Error, Result};

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            other => Err(Error::Config(format!("unknown STORE backend: {other}"))),
        }
    }
}

/// Worker pool and retry settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub workers: usize,
    pub capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("bad engine config: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read engine config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let retry = &defaults.retry;
        Ok(Self {
            workers: parsed_var("WORKERS", defaults.workers)?,
            capacity: parsed_var("QUEUE_CAPACITY", defaults.capacity)?,
            retry: RetryPolicy {
                max_attempts: parsed_var("RETRY_MAX_ATTEMPTS", retry.max_attempts)?,
                base_backoff: Duration::from_millis(parsed_var(
                    "RETRY_BASE_MS",
                    retry.base_backoff.as_millis() as u64,
                )?),
                factor: parsed_var("RETRY_FACTOR", retry.factor)?,
                max_backoff: Duration::from_millis(parsed_var(
                    "RETRY_MAX_MS",
                    retry.max_backoff.as_millis() as u64,
                )?),
                jitter: parsed_var("RETRY_JITTER", retry.jitter)?,
            },
        })
    }

    /// An engine builder preloaded with these settings.
    pub fn builder(&self) -> EngineBuilder {
        EngineBuilder::default()
            .workers(self.workers)
            .capacity(self.capacity)
            .retry(self.retry.clone())
    }
}

#[derive(Debug)]
pub struct Config {
    pub store: StoreKind,
    pub database_url: Option<SecretString>,
    pub redis_url: Option<SecretString>,
    pub redis_prefix: String,
    pub engine: EngineSettings,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let store: StoreKind = match std::env::var("STORE") {
            Ok(s) => s.parse()?,
            Err(_) => StoreKind::Memory,
        };

        let database_url = std::env::var("DATABASE_URL").ok().map(SecretString::from);
        let redis_url = std::env::var("REDIS_URL").ok().map(SecretString::from);

        match store {
            StoreKind::Postgres if database_url.is_none() => {
                return Err(missing_var("DATABASE_URL"));
            }
            StoreKind::Redis if redis_url.is_none() => return Err(missing_var("REDIS_URL")),
            _ => {}
        }

        Ok(Self {
            store,
            database_url,
            redis_url,
            redis_prefix: std::env::var("REDIS_PREFIX").unwrap_or_else(|_| "workq".to_string()),
            engine: EngineSettings::from_env()?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn missing_var(name: &str) -> Error {
    Error::Config(format!("required environment variable {name} is not set"))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_parses_aliases() {
        assert_eq!("Memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert_eq!("postgresql".parse::<StoreKind>().unwrap(), StoreKind::Postgres);
        assert!("sqlite".parse::<StoreKind>().is_err());
    }

    #[test]
    fn engine_settings_fill_missing_fields_with_defaults() {
        let settings = EngineSettings::from_toml_str(
            "workers = 2\n\n[retry]\nmax_attempts = 4\nbase_backoff = 50\n",
        )
        .unwrap();
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.capacity, DEFAULT_CAPACITY);
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.retry.base_backoff, Duration::from_millis(50));
        assert_eq!(settings.retry.factor, 2.0);
    }

    #[test]
    fn engine_settings_reject_bad_toml() {
        assert!(EngineSettings::from_toml_str("workers = \"many\"").is_err());
    }
}
