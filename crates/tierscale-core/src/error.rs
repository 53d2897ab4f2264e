//! Error types shared across TierScale crates.

use serde::Serialize;
use thiserror::Error;

/// Errors raised while loading or validating a `ControllerConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("tier ladder is empty")]
    EmptyLadder,

    #[error("tier listed more than once: {0}")]
    DuplicateTier(String),

    #[error("initial tier is not on the ladder: {0}")]
    UnknownInitialTier(String),

    #[error("invalid threshold {name}: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("history capacity must be at least 1")]
    ZeroHistoryCapacity,
}

/// Failure reported by an external collaborator (store, cache, audit, history).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{collaborator}: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed ("tier_limits", "cache", "audit", "usage").
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}
