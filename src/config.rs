//! Clock configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::channel::ChannelConfig;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_RELAY_PATH: &str = "/socket.clocks";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
pub const DEFAULT_DECISION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_COLLISION_RETRIES: u32 = 5;
pub const DEFAULT_IDENTITY_PATH: &str = "examclock-identity.json";
pub const DEFAULT_CLOCK_NAME: &str = "Exam Clock";
pub const DEFAULT_OCCUPANCY_FLAGS: &str = "male,female";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockConfig {
    pub channel: ChannelConfig,
    pub decision_timeout: Duration,
    pub max_collision_retries: u32,
    pub identity_path: PathBuf,
    pub clock_name: String,
    pub open_to_requests: bool,
    pub occupancy_flags: Vec<String>,
}

impl ClockConfig {
    /// Build typed clock config from environment variables.
    ///
    /// Optional:
    /// - `EXAMCLOCK_RELAY_URL`: http(s) or ws(s) base URL, default `http://127.0.0.1:3000`
    /// - `EXAMCLOCK_RELAY_PATH`: default `/socket.clocks`
    /// - `EXAMCLOCK_CONNECT_TIMEOUT_SECS`: default 20
    /// - `EXAMCLOCK_BACKOFF_MIN_MS` / `EXAMCLOCK_BACKOFF_MAX_MS`: default 1000 / 10000
    /// - `EXAMCLOCK_DECISION_TIMEOUT_SECS`: default 60
    /// - `EXAMCLOCK_MAX_COLLISION_RETRIES`: default 5
    /// - `EXAMCLOCK_IDENTITY_PATH`: default `examclock-identity.json`
    /// - `EXAMCLOCK_CLOCK_NAME`: default `Exam Clock`
    /// - `EXAMCLOCK_OPEN_TO_REQUESTS`: default true
    /// - `EXAMCLOCK_OCCUPANCY_FLAGS`: comma-separated, default `male,female`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for any value that is set but cannot
    /// be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClockConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for any value that is set but cannot
    /// be used.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let relay_url = lookup("EXAMCLOCK_RELAY_URL")
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        validate_relay_url(&relay_url)?;

        let backoff_min = env_parse_u64(&lookup, "EXAMCLOCK_BACKOFF_MIN_MS", DEFAULT_BACKOFF_MIN_MS)?;
        let backoff_max = env_parse_u64(&lookup, "EXAMCLOCK_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS)?;
        if backoff_min == 0 || backoff_max < backoff_min {
            return Err(ConfigError::Invalid {
                var: "EXAMCLOCK_BACKOFF_MAX_MS",
                value: backoff_max.to_string(),
                reason: format!("must be at least EXAMCLOCK_BACKOFF_MIN_MS ({backoff_min}) and non-zero"),
            });
        }

        let channel = ChannelConfig {
            relay_url,
            relay_path: lookup("EXAMCLOCK_RELAY_PATH").unwrap_or_else(|| DEFAULT_RELAY_PATH.to_string()),
            connect_timeout: Duration::from_secs(env_parse_u64(
                &lookup,
                "EXAMCLOCK_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            backoff_min: Duration::from_millis(backoff_min),
            backoff_max: Duration::from_millis(backoff_max),
        };

        let max_collision_retries = match lookup("EXAMCLOCK_MAX_COLLISION_RETRIES") {
            None => DEFAULT_MAX_COLLISION_RETRIES,
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
                var: "EXAMCLOCK_MAX_COLLISION_RETRIES",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        };

        let occupancy_flags = parse_flags(
            &lookup("EXAMCLOCK_OCCUPANCY_FLAGS").unwrap_or_else(|| DEFAULT_OCCUPANCY_FLAGS.to_string()),
        )?;

        Ok(Self {
            channel,
            decision_timeout: Duration::from_secs(env_parse_u64(
                &lookup,
                "EXAMCLOCK_DECISION_TIMEOUT_SECS",
                DEFAULT_DECISION_TIMEOUT_SECS,
            )?),
            max_collision_retries,
            identity_path: lookup("EXAMCLOCK_IDENTITY_PATH")
                .map_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH), PathBuf::from),
            clock_name: lookup("EXAMCLOCK_CLOCK_NAME").unwrap_or_else(|| DEFAULT_CLOCK_NAME.to_string()),
            open_to_requests: env_parse_bool(&lookup, "EXAMCLOCK_OPEN_TO_REQUESTS", true)?,
            occupancy_flags,
        })
    }
}

fn env_parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::Invalid { var: key, value: raw.clone(), reason: e.to_string() })
}

fn env_parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var: key, value: raw, reason: "expected true or false".into() }),
    }
}

fn validate_relay_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid { var: "EXAMCLOCK_RELAY_URL", value: raw.to_string(), reason };
    let url = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

/// Split a comma-separated flag list, dropping blanks.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when no flag names remain.
pub fn parse_flags(raw: &str) -> Result<Vec<String>, ConfigError> {
    let flags: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|flag| !flag.is_empty())
        .map(str::to_string)
        .collect();
    if flags.is_empty() {
        return Err(ConfigError::Invalid {
            var: "EXAMCLOCK_OCCUPANCY_FLAGS",
            value: raw.to_string(),
            reason: "at least one flag is required".into(),
        });
    }
    Ok(flags)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
