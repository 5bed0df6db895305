use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::fieldclimate::auth::TimestampFormat;
use crate::services::circuit_breaker::CircuitBreakerConfig;
use crate::services::rate_limit::{EndpointClass, RateBudget, RateLimits};
use crate::services::retry::RetryPolicy;

/// Upper bound for any backfill, from configuration or the command line.
pub const MAX_BACKFILL_DAYS: i64 = 36_500;

/// Station ids end up in signed URL paths, so only `[A-Za-z0-9_-]` is allowed.
#[must_use]
pub fn is_valid_station_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Check a backfill length in days against `0..=MAX_BACKFILL_DAYS`.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` under `name` if out of range.
pub fn check_backfill_days(name: &'static str, days: i64) -> Result<i64, ConfigError> {
    if (0..=MAX_BACKFILL_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ConfigError::Invalid {
            name,
            reason: format!("{days} is outside 0..={MAX_BACKFILL_DAYS}"),
        })
    }
}

/// A station listed in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub id: String,
    pub name: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,
    pub optimize_after_collection: bool,

    // FieldClimate API
    pub api_base_url: String,
    /// Required for collection; `stats` and `serve` run without keys.
    pub public_key_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub timestamp_format: TimestampFormat,
    pub request_timeout_seconds: u64,

    // Retry / circuit breaker
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    pub circuit_failure_threshold: u32,
    pub circuit_window_seconds: u64,
    pub circuit_cooldown_seconds: u64,

    // Rate limiting (outbound, per endpoint class)
    pub rate_limit_metadata_per_minute: u32,
    pub rate_limit_metadata_per_hour: u32,
    pub rate_limit_data_per_minute: u32,
    pub rate_limit_data_per_hour: u32,

    // Collection
    pub stations: Vec<StationConfig>,
    pub backfill_days: i64,
    pub batch_size: usize,
    pub interval_minutes: u64,

    // Read-only API
    pub api_host: String,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/fieldclimate.db"),
            optimize_after_collection: false,

            api_base_url: "https://api.fieldclimate.com/v2".to_string(),
            public_key_path: None,
            private_key_path: None,
            timestamp_format: TimestampFormat::HttpDate,
            request_timeout_seconds: 30,

            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            retry_jitter: true,
            circuit_failure_threshold: 5,
            circuit_window_seconds: 300,
            circuit_cooldown_seconds: 60,

            // The vendor allows 8000 requests/hour per account
            rate_limit_metadata_per_minute: 30,
            rate_limit_metadata_per_hour: 600,
            rate_limit_data_per_minute: 100,
            rate_limit_data_per_hour: 6600,

            stations: Vec::new(),
            backfill_days: 7,
            batch_size: 1000,
            interval_minutes: 60,

            api_host: "127.0.0.1".to_string(),
            api_port: 3000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    /// Unset variables keep their [`Default`] values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let config = Self {
            // Database
            database_path: optional_path("DATABASE_PATH").unwrap_or(d.database_path),
            optimize_after_collection: parse_var("OPTIMIZE_AFTER_COLLECTION", d.optimize_after_collection)?,

            // FieldClimate API
            api_base_url: env::var("FIELDCLIMATE_BASE_URL")
                .unwrap_or(d.api_base_url)
                .trim_end_matches('/')
                .to_string(),
            public_key_path: optional_path("FIELDCLIMATE_PUBLIC_KEY_PATH"),
            private_key_path: optional_path("FIELDCLIMATE_PRIVATE_KEY_PATH"),
            timestamp_format: parse_var("FIELDCLIMATE_TIMESTAMP_FORMAT", d.timestamp_format)?,
            request_timeout_seconds: parse_var("REQUEST_TIMEOUT_SECONDS", d.request_timeout_seconds)?,

            // Retry / circuit breaker
            max_retries: parse_var("MAX_RETRIES", d.max_retries)?,
            retry_base_delay_ms: parse_var("RETRY_BASE_DELAY_MS", d.retry_base_delay_ms)?,
            retry_max_delay_ms: parse_var("RETRY_MAX_DELAY_MS", d.retry_max_delay_ms)?,
            retry_jitter: parse_var("RETRY_JITTER", d.retry_jitter)?,
            circuit_failure_threshold: parse_var("CIRCUIT_FAILURE_THRESHOLD", d.circuit_failure_threshold)?,
            circuit_window_seconds: parse_var("CIRCUIT_WINDOW_SECONDS", d.circuit_window_seconds)?,
            circuit_cooldown_seconds: parse_var("CIRCUIT_COOLDOWN_SECONDS", d.circuit_cooldown_seconds)?,

            // Rate limiting
            rate_limit_metadata_per_minute: parse_var("RATE_LIMIT_METADATA_PER_MINUTE", d.rate_limit_metadata_per_minute)?,
            rate_limit_metadata_per_hour: parse_var("RATE_LIMIT_METADATA_PER_HOUR", d.rate_limit_metadata_per_hour)?,
            rate_limit_data_per_minute: parse_var("RATE_LIMIT_DATA_PER_MINUTE", d.rate_limit_data_per_minute)?,
            rate_limit_data_per_hour: parse_var("RATE_LIMIT_DATA_PER_HOUR", d.rate_limit_data_per_hour)?,

            // Collection
            stations: parse_stations(&env::var("STATIONS").unwrap_or_default())?,
            backfill_days: parse_var("BACKFILL_DAYS", d.backfill_days)?,
            batch_size: parse_var("BATCH_SIZE", d.batch_size)?,
            interval_minutes: parse_var("INTERVAL_MINUTES", d.interval_minutes)?,

            // Read-only API
            api_host: env::var("API_HOST").unwrap_or(d.api_host),
            api_port: parse_var("API_PORT", d.api_port)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that a plain parse cannot catch.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        check_backfill_days("BACKFILL_DAYS", self.backfill_days)?;
        if self.interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                name: "INTERVAL_MINUTES",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                name: "CIRCUIT_FAILURE_THRESHOLD",
                reason: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("RATE_LIMIT_METADATA_PER_MINUTE", self.rate_limit_metadata_per_minute),
            ("RATE_LIMIT_METADATA_PER_HOUR", self.rate_limit_metadata_per_hour),
            ("RATE_LIMIT_DATA_PER_MINUTE", self.rate_limit_data_per_minute),
            ("RATE_LIMIT_DATA_PER_HOUR", self.rate_limit_data_per_hour),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path.display())
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }

    #[must_use]
    pub fn rate_limits(&self) -> RateLimits {
        RateLimits::default()
            .with(
                EndpointClass::Metadata,
                RateBudget::new(
                    self.rate_limit_metadata_per_minute,
                    self.rate_limit_metadata_per_hour,
                ),
            )
            .with(
                EndpointClass::Data,
                RateBudget::new(self.rate_limit_data_per_minute, self.rate_limit_data_per_hour),
            )
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            window: Duration::from_secs(self.circuit_window_seconds),
            cooldown: Duration::from_secs(self.circuit_cooldown_seconds),
        }
    }

    /// Both key file paths, as needed by the API client.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` naming the first unset variable.
    pub fn key_paths(&self) -> Result<(&Path, &Path), ConfigError> {
        let public = self
            .public_key_path
            .as_deref()
            .ok_or(ConfigError::Missing("FIELDCLIMATE_PUBLIC_KEY_PATH"))?;
        let private = self
            .private_key_path
            .as_deref()
            .ok_or(ConfigError::Missing("FIELDCLIMATE_PRIVATE_KEY_PATH"))?;
        Ok((public, private))
    }
}

fn optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Parse the `STATIONS` list: comma-separated `id` or `id=name`, `!` prefix disables.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for an entry with an empty, malformed or
/// duplicate id.
pub fn parse_stations(raw: &str) -> Result<Vec<StationConfig>, ConfigError> {
    let mut stations: Vec<StationConfig> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (enabled, entry) = match entry.strip_prefix('!') {
            Some(rest) => (false, rest.trim()),
            None => (true, entry),
        };

        let (id, name) = match entry.split_once('=') {
            Some((id, name)) => (id.trim(), Some(name.trim()).filter(|n| !n.is_empty())),
            None => (entry, None),
        };

        if id.is_empty() {
            return Err(ConfigError::Invalid {
                name: "STATIONS",
                reason: format!("entry '{entry}' has no station id"),
            });
        }
        if !is_valid_station_id(id) {
            return Err(ConfigError::Invalid {
                name: "STATIONS",
                reason: format!("station id '{id}' may only contain letters, digits, '_' and '-'"),
            });
        }
        if stations.iter().any(|s| s.id == id) {
            return Err(ConfigError::Invalid {
                name: "STATIONS",
                reason: format!("station '{id}' listed twice"),
            });
        }

        stations.push(StationConfig {
            id: id.to_string(),
            name: name.map(ToString::to_string),
            enabled,
        });
    }

    Ok(stations)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("API key file {path}: {reason}")]
    KeyFile { path: PathBuf, reason: String },
}
