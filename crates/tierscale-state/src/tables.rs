//! redb table definitions for the TierScale state store.

use redb::TableDefinition;

/// Persisted tier limits keyed by tier name.
pub const TIER_LIMITS: TableDefinition<&str, &[u8]> = TableDefinition::new("tier_limits");

/// Audit events keyed by insertion sequence.
pub const AUDIT_EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_events");

/// Usage samples keyed by `(timestamp, seq)`, so time windows are range scans.
/// `seq` disambiguates samples recorded in the same second.
pub const USAGE_SAMPLES: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("usage_samples");
