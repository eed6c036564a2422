//! Configuration management for the investigation service.
//!
//! Configuration is read from environment variables:
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `SUPABASE_URL` - Required. Base URL for the identity provider and relational store.
//! - `SUPABASE_ANON_KEY` - Required. Anon key used when validating user tokens.
//! - `SUPABASE_SERVICE_ROLE_KEY` - Required. Service role key for table access.
//! - `CLICKHOUSE_URL` - Optional. Analytics store HTTP endpoint. Defaults to `http://localhost:8123`.
//! - `CLICKHOUSE_USER` / `CLICKHOUSE_PASSWORD` - Optional. Analytics credentials.
//! - `CLICKHOUSE_DATABASE` - Optional. Analytics database. Defaults to `tensorzero`.
//! - `TENSORZERO_BASE_URL` - Optional. AI reasoning gateway. Defaults to `http://localhost:3000`.
//! - `TENSORZERO_API_KEY` - Optional. Bearer key for the gateway.
//! - `TENSORZERO_FUNCTION` - Optional. Gateway function name. Defaults to `investigate_issue`.
//! - `INVESTIGATION_POLL_INTERVAL_SECS` - Optional. Pending poll interval. Defaults to `2`.
//! - `INVESTIGATION_WAIT_SECS` - Optional. Interactive wait budget. Defaults to `120`.
//! - `PENDING_WAIT_SECS` - Optional. Background wait budget. Defaults to `600`.

use std::time::Duration;
use thiserror::Error;

use crate::util::{env_var_non_empty, env_var_u64};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Supabase project settings (identity provider + relational store).
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    /// Public anon key, sent as `apikey` when resolving user tokens
    pub anon_key: String,
    /// Service role key (full table access, never exposed to callers)
    pub service_role_key: String,
}

/// ClickHouse connection settings for the analytics store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: String::new(),
            database: "tensorzero".to_string(),
        }
    }
}

/// AI reasoning gateway settings.
#[derive(Debug, Clone)]
pub struct TensorZeroConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub function_name: String,
}

impl Default for TensorZeroConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: None,
            function_name: "investigate_issue".to_string(),
        }
    }
}

/// Timing for waits on agent-side execution.
///
/// Interactive and background waits use separate budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Budget used while an HTTP request is held open by the orchestrator
    pub interactive_budget: Duration,
    /// Budget used by the standalone pending-wait endpoint
    pub background_budget: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            interactive_budget: Duration::from_secs(120),
            background_budget: Duration::from_secs(600),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub supabase: SupabaseConfig,

    pub clickhouse: ClickHouseConfig,

    pub tensorzero: TensorZeroConfig,

    pub poll: PollConfig,
}

fn required(name: &str) -> Result<String, ConfigError> {
    env_var_non_empty(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn seconds(name: &str, default: u64) -> Result<Duration, ConfigError> {
    env_var_u64(name, default)
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if any Supabase variable is unset and
    /// `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_var_non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = env_var_non_empty("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let supabase = SupabaseConfig {
            url: required("SUPABASE_URL")?,
            anon_key: required("SUPABASE_ANON_KEY")?,
            service_role_key: required("SUPABASE_SERVICE_ROLE_KEY")?,
        };

        let ch_defaults = ClickHouseConfig::default();
        let clickhouse = ClickHouseConfig {
            url: env_var_non_empty("CLICKHOUSE_URL").unwrap_or(ch_defaults.url),
            user: env_var_non_empty("CLICKHOUSE_USER").unwrap_or(ch_defaults.user),
            password: std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default(),
            database: env_var_non_empty("CLICKHOUSE_DATABASE").unwrap_or(ch_defaults.database),
        };

        let tz_defaults = TensorZeroConfig::default();
        let tensorzero = TensorZeroConfig {
            base_url: env_var_non_empty("TENSORZERO_BASE_URL").unwrap_or(tz_defaults.base_url),
            api_key: env_var_non_empty("TENSORZERO_API_KEY"),
            function_name: env_var_non_empty("TENSORZERO_FUNCTION")
                .unwrap_or(tz_defaults.function_name),
        };

        let poll = PollConfig {
            interval: seconds("INVESTIGATION_POLL_INTERVAL_SECS", 2)?,
            interactive_budget: seconds("INVESTIGATION_WAIT_SECS", 120)?,
            background_budget: seconds("PENDING_WAIT_SECS", 600)?,
        };

        if poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "INVESTIGATION_POLL_INTERVAL_SECS".to_string(),
                "must be at least 1 second".to_string(),
            ));
        }

        Ok(Self {
            host,
            port,
            supabase,
            clickhouse,
            tensorzero,
            poll,
        })
    }

    /// Create a config pointing every dependency at `base_url` (useful for testing).
    pub fn new(base_url: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            supabase: SupabaseConfig {
                url: base_url.to_string(),
                anon_key: "anon".to_string(),
                service_role_key: "service".to_string(),
            },
            clickhouse: ClickHouseConfig {
                url: base_url.to_string(),
                ..ClickHouseConfig::default()
            },
            tensorzero: TensorZeroConfig {
                base_url: base_url.to_string(),
                ..TensorZeroConfig::default()
            },
            poll: PollConfig::default(),
        }
    }
}
