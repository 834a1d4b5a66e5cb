//! Environment-driven runtime settings.

use std::time::Duration;

const DEFAULT_BOOTSTRAP: &str = "localhost:9092";
const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_STOP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
const DEFAULT_INSPECTOR_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct SettingsError {
    pub name: &'static str,
    pub value: String,
}

/// Process-wide settings, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Default bootstrap servers for inspector queries when the caller does
    /// not supply their own.
    pub kafka_bootstrap_servers: String,
    /// Reserved for a durable store backing; the reference build ignores it.
    pub database_url: Option<String>,
    pub log_level: String,
    pub stop_timeout: Duration,
    pub poll_timeout: Duration,
    pub inspector_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kafka_bootstrap_servers: DEFAULT_BOOTSTRAP.to_string(),
            database_url: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECONDS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            inspector_timeout: Duration::from_secs(DEFAULT_INSPECTOR_TIMEOUT_SECONDS),
        }
    }
}

impl Settings {
    /// Resolve settings from process environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings from an arbitrary lookup. Split out so tests do not
    /// have to mutate process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let stop_secs = parse_or(
            lookup("STOP_TIMEOUT_SECONDS"),
            "STOP_TIMEOUT_SECONDS",
            DEFAULT_STOP_TIMEOUT_SECONDS,
        )?;
        let poll_ms = parse_or(
            lookup("POLL_TIMEOUT_MS"),
            "POLL_TIMEOUT_MS",
            DEFAULT_POLL_TIMEOUT_MS,
        )?;
        let inspector_secs = parse_or(
            lookup("INSPECTOR_TIMEOUT_SECONDS"),
            "INSPECTOR_TIMEOUT_SECONDS",
            DEFAULT_INSPECTOR_TIMEOUT_SECONDS,
        )?;

        Ok(Self {
            kafka_bootstrap_servers: lookup("KAFKA_BOOTSTRAP_SERVERS")
                .unwrap_or(defaults.kafka_bootstrap_servers),
            database_url: lookup("DATABASE_URL"),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            stop_timeout: Duration::from_secs(stop_secs),
            poll_timeout: Duration::from_millis(poll_ms),
            inspector_timeout: Duration::from_secs(inspector_secs),
        })
    }
}

fn parse_or(
    raw: Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, SettingsError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| SettingsError { name, value }),
    }
}
