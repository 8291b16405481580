//! Error types shared by the router, coordinator, and config loader.

use std::path::PathBuf;

use thiserror::Error;

/// Structural failure while decoding an inbound client or receiver message.
///
/// Returned from the router's inbound entry points. The whole inbound message
/// is rejected; no partial handling happens before the error surfaces.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' must be {expected}")]
    WrongFieldType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("invalid message envelope: {0}")]
    InvalidEnvelope(String),
}

/// Launch coordinator callback arriving in a state that cannot accept it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("{event} is not accepted while {state}")]
    UnexpectedTransition {
        event: &'static str,
        state: &'static str,
    },
    #[error("completion for launch {0} is stale")]
    StaleCompletion(uuid::Uuid),
}

/// Failure while reading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
