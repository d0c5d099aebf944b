//! Gateway configuration.
//!
//! Values come from a TOML document and may be overridden per field by
//! `SQLGATE_<FIELD>` environment variables (e.g.
//! `SQLGATE_MAX_QUERY_DURATION_SECONDS=60`).
//!
//! ```toml
//! [gateway]
//! max_query_duration_seconds = 300
//! max_result_rows = 100000
//! max_result_size_mb = 50
//! result_retention_hours = 24
//!
//! [quota.defaults]
//! queries_per_hour = 100
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::policy::QuotaConfig;

const ENV_PREFIX: &str = "SQLGATE_";

/// One day: upper bound for engine deadlines and the validation budget.
const MAX_DURATION_SECONDS: u64 = 24 * 60 * 60;

/// Ten years of result retention.
const MAX_RETENTION_HOURS: u64 = 10 * 365 * 24;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var}={value:?} is not a valid number")]
    Env { var: String, value: String },

    #[error("config field {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Limits the execution orchestrator enforces. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Engine deadline for real executions.
    pub max_query_duration_seconds: u64,
    /// Row cap passed to the engine and checked on the result.
    pub max_result_rows: u64,
    /// Ceiling on the serialized size of a result.
    pub max_result_size_mb: u64,
    /// How long completed results stay readable.
    pub result_retention_hours: u64,
    /// Budget for dry-run validation.
    pub validation_timeout_seconds: u64,
    /// Engine error messages are truncated to this many characters before storage.
    pub max_error_message_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_query_duration_seconds: 300,
            max_result_rows: 100_000,
            max_result_size_mb: 50,
            result_retention_hours: 24,
            validation_timeout_seconds: 10,
            max_error_message_len: 1000,
        }
    }
}

impl GatewayConfig {
    /// Parse a bare gateway table (no `[gateway]` header).
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_config(path)?)
    }

    pub fn max_result_bytes(&self) -> u64 {
        self.max_result_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn retention(&self) -> time::Duration {
        time::Duration::hours(i64::try_from(self.result_retention_hours).unwrap_or(i64::MAX / 3600))
    }

    /// Reject zero limits and limits past their ceilings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_query_duration_seconds", self.max_query_duration_seconds),
            ("max_result_rows", self.max_result_rows),
            ("max_result_size_mb", self.max_result_size_mb),
            ("result_retention_hours", self.result_retention_hours),
            ("validation_timeout_seconds", self.validation_timeout_seconds),
            ("max_error_message_len", self.max_error_message_len as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        let ceilings = [
            ("max_query_duration_seconds", self.max_query_duration_seconds, MAX_DURATION_SECONDS),
            ("validation_timeout_seconds", self.validation_timeout_seconds, MAX_DURATION_SECONDS),
            ("result_retention_hours", self.result_retention_hours, MAX_RETENTION_HOURS),
        ];
        for (field, value, max) in ceilings {
            if value > max {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be at most {max}"),
                });
            }
        }
        Ok(())
    }

    /// Apply `SQLGATE_<FIELD>` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |field: &str| -> Result<Option<u64>, ConfigError> {
            let var = format!("{ENV_PREFIX}{}", field.to_uppercase());
            match lookup(&var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Env { var, value }),
            }
        };

        if let Some(v) = parse("max_query_duration_seconds")? {
            self.max_query_duration_seconds = v;
        }
        if let Some(v) = parse("max_result_rows")? {
            self.max_result_rows = v;
        }
        if let Some(v) = parse("max_result_size_mb")? {
            self.max_result_size_mb = v;
        }
        if let Some(v) = parse("result_retention_hours")? {
            self.result_retention_hours = v;
        }
        if let Some(v) = parse("validation_timeout_seconds")? {
            self.validation_timeout_seconds = v;
        }
        if let Some(v) = parse("max_error_message_len")? {
            self.max_error_message_len = usize::try_from(v).unwrap_or(usize::MAX);
        }
        Ok(self)
    }
}

/// A full configuration document: gateway limits plus reference quota limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub quota: QuotaConfig,
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(s)?;
        settings.gateway.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_config(path)?)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
