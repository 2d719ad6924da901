//! Environment-backed configuration for `dome-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use dome_client::SessionConfig;
use dome_transport::DEFAULT_CONTROL_ENDPOINT;

const DEFAULT_DEVICE_ID: &str = "dome-smoke-device";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Runtime configuration for one smoke run.
#[derive(Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub api_id: String,
    pub api_key: String,
    pub device_id: String,
    pub push_token: Option<String>,
    /// Control-plane base URL.
    pub endpoint: String,
    pub request_timeout: Duration,
    /// Continue with an empty log when the history fetch fails.
    pub best_effort_history: bool,
    /// Optional message sent once the session is active.
    pub message: Option<String>,
}

impl fmt::Debug for SmokeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmokeConfig")
            .field("api_id", &self.api_id)
            .field("device_id", &self.device_id)
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("best_effort_history", &self.best_effort_history)
            .finish_non_exhaustive()
    }
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_id = required_env("DOME_API_ID", &mut lookup)?;
        let api_key = required_env("DOME_API_KEY", &mut lookup)?;
        let device_id = optional_trimmed_env("DOME_DEVICE_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_owned());
        let push_token = optional_trimmed_env("DOME_PUSH_TOKEN", &mut lookup);
        let endpoint = optional_trimmed_env("DOME_ENDPOINT", &mut lookup)
            .unwrap_or_else(|| DEFAULT_CONTROL_ENDPOINT.to_owned());
        let request_timeout_ms = parse_optional_u64(
            "DOME_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let best_effort_history = parse_optional_bool("DOME_BEST_EFFORT_HISTORY", &mut lookup)?;
        let message = optional_trimmed_env("DOME_SMOKE_MESSAGE", &mut lookup);

        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOME_REQUEST_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            api_id,
            api_key,
            device_id,
            push_token,
            endpoint,
            request_timeout: Duration::from_millis(request_timeout_ms),
            best_effort_history,
            message,
        })
    }

    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            control_endpoint: self.endpoint.clone(),
            request_timeout: self.request_timeout,
            best_effort_history: self.best_effort_history,
            ..SessionConfig::default()
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean (true/false)".to_owned(),
        }),
    }
}
