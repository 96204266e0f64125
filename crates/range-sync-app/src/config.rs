//! Environment-driven configuration, validated eagerly at startup.
//! Every setting has a sane default except the ones that genuinely
//! cannot, and a missing or malformed value fails the process before
//! it ever binds a socket.

use std::env;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub rule_set_path: String,
    pub event_queue_capacity: usize,
    pub saga_step_deadline_secs: Option<u64>,
    pub log_format: LogFormat,
}

impl Config {
    /// Reads and validates configuration from the process environment.
    /// `.env` is loaded first (if present) via `dotenvy`, but real
    /// environment variables always take precedence over `.env`
    /// contents.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("RANGE_SYNC_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string());

        let bind_port = match env::var("RANGE_SYNC_BIND_PORT") {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => 8080,
        };

        let rule_set_path = env::var("RANGE_SYNC_RULE_SET_PATH")
            .map_err(|_| ConfigError::MissingVar("RANGE_SYNC_RULE_SET_PATH".to_string()))?;

        let event_queue_capacity = match env::var("RANGE_SYNC_EVENT_QUEUE_CAPACITY") {
            Ok(raw) => parse_capacity(&raw)?,
            Err(_) => range_sync_core::queue::DEFAULT_CAPACITY,
        };

        let saga_step_deadline_secs = match env::var("RANGE_SYNC_SAGA_STEP_DEADLINE_SECS") {
            Ok(raw) => Some(parse_deadline(&raw)?),
            Err(_) => None,
        };

        let log_format = match env::var("RANGE_SYNC_LOG_FORMAT") {
            Ok(raw) => parse_log_format(&raw)?,
            Err(_) => LogFormat::Pretty,
        };

        Ok(Config {
            bind_addr,
            bind_port,
            rule_set_path,
            event_queue_capacity,
            saga_step_deadline_secs,
            log_format,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidVar {
            name: "RANGE_SYNC_BIND_PORT".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_capacity(raw: &str) -> Result<usize, ConfigError> {
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidVar {
            name: "RANGE_SYNC_EVENT_QUEUE_CAPACITY".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
    if value == 0 {
        return Err(ConfigError::InvalidVar {
            name: "RANGE_SYNC_EVENT_QUEUE_CAPACITY".to_string(),
            value: raw.to_string(),
            reason: "capacity must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn parse_deadline(raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidVar {
            name: "RANGE_SYNC_SAGA_STEP_DEADLINE_SECS".to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn parse_log_format(raw: &str) -> Result<LogFormat, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(ConfigError::InvalidVar {
            name: "RANGE_SYNC_LOG_FORMAT".to_string(),
            value: other.to_string(),
            reason: "expected \"pretty\" or \"json\"".to_string(),
        }),
    }
}
