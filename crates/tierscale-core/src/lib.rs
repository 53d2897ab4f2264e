//! tierscale-core: shared types for the TierScale capacity controller.
//!
//! Holds the static tier ladder, the controller configuration (parsed from
//! TOML), the plain data types that flow between the controller and its
//! collaborators, and the collaborator contracts themselves.

pub mod config;
pub mod error;
pub mod ports;
pub mod tier;
pub mod types;

pub use config::{CacheConfig, ControllerConfig, Thresholds};
pub use error::{CollaboratorError, ConfigError};
pub use ports::{AuditSink, BoxFuture, CacheMirror, CollabResult, TierLimitStore, UsageHistory};
pub use tier::{Tier, TierLadder};
pub use types::*;
