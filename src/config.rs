//! Environment-driven configuration.
//!
//! All settings come from `GUARD_*` environment variables (loaded from
//! `.env` via dotenvy before [`Config::from_env`] runs). Missing optional
//! settings fall back to documented defaults; missing required settings
//! produce [`ConfigError::MissingRequired`] with a hint the binary prints
//! before exiting.

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Server-wide defaults for the payload pipeline thresholds.
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.8;
/// Default flag threshold. A triggered detector at confidence 0.0 still
/// flags under this default; detectors that do not want to flag must
/// leave `triggered` false. Documented in the policy guide.
pub const DEFAULT_FLAG_THRESHOLD: f64 = 0.0;
/// Default unsafe threshold for the tool pipeline.
pub const DEFAULT_UNSAFE_THRESHOLD: f64 = 0.8;

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port (`GUARD_HTTP_PORT`, default 8080).
    pub http_port: u16,
    /// Per-request detector fan-out deadline (`GUARD_DETECTOR_TIMEOUT_MS`, default 100).
    pub detector_timeout: Duration,
    /// Server default block threshold (`GUARD_BLOCK_THRESHOLD`, default 0.8).
    pub block_threshold: f64,
    /// Server default flag threshold (`GUARD_FLAG_THRESHOLD`, default 0.0).
    pub flag_threshold: f64,
    /// Tool pipeline unsafe threshold (`GUARD_UNSAFE_THRESHOLD`, default 0.8).
    pub unsafe_threshold: f64,
    /// Auth cache TTL (`GUARD_AUTH_CACHE_TTL_S`, default 30).
    pub auth_cache_ttl: Duration,
    /// Tool definition cache TTL (`GUARD_TOOL_CACHE_TTL_S`, default 60).
    pub tool_cache_ttl: Duration,
    /// Credential store DSN (`DATABASE_URL`). Optional: without it the
    /// process runs on in-memory stores (dev mode).
    pub database_url: Option<SecretString>,
    /// Connection pool size (`DATABASE_POOL_SIZE`, default 10).
    pub pool_size: usize,
    /// Optional ML classifier endpoint (`GUARD_CLASSIFIER_URL`).
    pub classifier_url: Option<String>,
    /// Optional bearer token protecting the admin API (`GUARD_ADMIN_TOKEN`).
    pub admin_token: Option<SecretString>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            detector_timeout: Duration::from_millis(100),
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            flag_threshold: DEFAULT_FLAG_THRESHOLD,
            unsafe_threshold: DEFAULT_UNSAFE_THRESHOLD,
            auth_cache_ttl: Duration::from_secs(30),
            tool_cache_ttl: Duration::from_secs(60),
            database_url: None,
            pool_size: 10,
            classifier_url: None,
            admin_token: None,
        }
    }
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port = parse_optional_env("GUARD_HTTP_PORT", 8080u16)?;
        let timeout_ms = parse_optional_env("GUARD_DETECTOR_TIMEOUT_MS", 100u64)?;
        let block_threshold =
            parse_threshold("GUARD_BLOCK_THRESHOLD", DEFAULT_BLOCK_THRESHOLD)?;
        let flag_threshold = parse_threshold("GUARD_FLAG_THRESHOLD", DEFAULT_FLAG_THRESHOLD)?;
        let unsafe_threshold =
            parse_threshold("GUARD_UNSAFE_THRESHOLD", DEFAULT_UNSAFE_THRESHOLD)?;
        let auth_ttl_s = parse_optional_env("GUARD_AUTH_CACHE_TTL_S", 30u64)?;
        let tool_ttl_s = parse_optional_env("GUARD_TOOL_CACHE_TTL_S", 60u64)?;
        let pool_size = parse_optional_env("DATABASE_POOL_SIZE", 10usize)?;

        let database_url = optional_env("DATABASE_URL")?.map(SecretString::from);
        let classifier_url = optional_env("GUARD_CLASSIFIER_URL")?;
        let admin_token = optional_env("GUARD_ADMIN_TOKEN")?.map(SecretString::from);

        Ok(Self {
            http_port,
            detector_timeout: Duration::from_millis(timeout_ms),
            block_threshold,
            flag_threshold,
            unsafe_threshold,
            auth_cache_ttl: Duration::from_secs(auth_ttl_s),
            tool_cache_ttl: Duration::from_secs(tool_ttl_s),
            database_url,
            pool_size,
            classifier_url,
            admin_token,
        })
    }

    /// The credential store DSN, if configured.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_ref().map(|s| s.expose_secret())
    }
}

/// Read an environment variable, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

/// Read and parse an environment variable, falling back to a default.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

fn parse_threshold(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = parse_optional_env(key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("threshold {value} is outside [0.0, 1.0]"),
        });
    }
    Ok(value)
}
