//! App-crate error types. Kept distinct from `range_sync_core::RangeSyncError`
//! because these all arise at startup, before a single connection is
//! ever accepted, and the disposition for every one of them is the
//! same: fail fast with a descriptive message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(String),

    #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("failed to read rule-set file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse rule-set document at {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("rule-set document at {path} failed validation: {}", .problems.join("; "))]
    Invalid { path: String, problems: Vec<String> },
}
