//! tierscale-state: concrete collaborators for the TierScale controller.
//!
//! [`StateStore`] is backed by [redb](https://docs.rs/redb) and implements
//! the tier-limit store, the audit sink, and the usage history. Values are
//! JSON-serialized into redb's `&[u8]` value columns. Audit events use
//! monotonically increasing `u64` keys, so iteration order is insertion
//! order. Usage samples are keyed by `(timestamp, seq)` and pruned past a
//! retention horizon on every append.
//!
//! [`TierCache`] is an in-process TTL cache implementing the cache mirror.
//!
//! Both are `Clone` + `Send` + `Sync` and can be shared across async tasks.

pub mod cache;
pub mod error;
pub mod store;
pub mod tables;

pub use cache::TierCache;
pub use error::{StateError, StateResult};
pub use store::{StateStore, TierLimitsRow, DEFAULT_USAGE_RETENTION_DAYS};
