//! Collaborator contracts.
//!
//! The controller never talks to a database or cache directly. It calls
//! these traits, each of which returns a boxed future so implementations
//! can be shared as `Arc<dyn Trait>`.

use std::future::Future;
use std::pin::Pin;

use crate::error::CollaboratorError;
use crate::tier::Tier;
use crate::types::{AuditEvent, CachedTier, UsageAverage, UsageSample};

/// Boxed, sendable future returned by collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a collaborator call.
pub type CollabResult<T> = Result<T, CollaboratorError>;

/// Persists the limits of the active tier. Upserts are keyed by tier name.
pub trait TierLimitStore: Send + Sync {
    fn upsert_tier_limits<'a>(&'a self, tier: &'a Tier) -> BoxFuture<'a, CollabResult<()>>;

    /// Cheap connectivity check.
    fn health(&self) -> BoxFuture<'_, CollabResult<()>>;
}

/// Best-effort mirror of the current tier for fast readers.
pub trait CacheMirror: Send + Sync {
    fn set_current_tier<'a>(
        &'a self,
        key: &'a str,
        value: &'a CachedTier,
        ttl_secs: u64,
    ) -> BoxFuture<'a, CollabResult<()>>;

    /// Cheap connectivity check.
    fn health(&self) -> BoxFuture<'_, CollabResult<()>>;
}

/// Append-only audit trail.
pub trait AuditSink: Send + Sync {
    fn append<'a>(&'a self, event: &'a AuditEvent) -> BoxFuture<'a, CollabResult<()>>;
}

/// Historical usage: records samples and answers trailing-window averages.
pub trait UsageHistory: Send + Sync {
    /// Average usage recorded for `tier` over the last `window_days` days,
    /// or `None` when nothing was recorded.
    fn average_usage<'a>(
        &'a self,
        tier: &'a str,
        window_days: u32,
    ) -> BoxFuture<'a, CollabResult<Option<UsageAverage>>>;

    fn record_usage<'a>(&'a self, sample: &'a UsageSample) -> BoxFuture<'a, CollabResult<()>>;
}
