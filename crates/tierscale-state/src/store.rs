//! StateStore: redb-backed persistence for TierScale collaborators.
//!
//! Provides typed operations over tier limits, the audit trail, and usage
//! samples, and implements the `TierLimitStore`, `AuditSink`, and
//! `UsageHistory` contracts on top of them. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tierscale_core::{
    epoch_secs, AuditEvent, AuditSink, BoxFuture, CollabResult, CollaboratorError, Tier,
    TierLimitStore, UsageAverage, UsageHistory, UsageSample,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Usage samples older than this (relative to the newest append) are pruned.
pub const DEFAULT_USAGE_RETENTION_DAYS: u32 = 30;

/// Persisted limits for one tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierLimitsRow {
    pub tier_name: String,
    pub max_tokens: u64,
    pub max_teams: u32,
    pub cost_per_month: f64,
    pub capabilities: Vec<String>,
    /// Unix timestamp (seconds) of the last upsert.
    pub updated_at: u64,
}

impl From<&Tier> for TierLimitsRow {
    fn from(tier: &Tier) -> Self {
        Self {
            tier_name: tier.name.clone(),
            max_tokens: tier.max_tokens,
            max_teams: tier.max_teams,
            cost_per_month: tier.monthly_cost,
            capabilities: tier.capabilities.iter().cloned().collect(),
            updated_at: epoch_secs(),
        }
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    usage_retention_secs: u64,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            usage_retention_secs: u64::from(DEFAULT_USAGE_RETENTION_DAYS) * SECS_PER_DAY,
        }
    }

    /// Keep usage samples for `days`. Should cover the longest averaging
    /// window the controller queries.
    pub fn with_usage_retention_days(mut self, days: u32) -> Self {
        self.usage_retention_secs = u64::from(days) * SECS_PER_DAY;
        self
    }

    /// Cheap liveness check: open a read transaction and a table.
    pub fn ping(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        txn.open_table(TIER_LIMITS).map_err(map_err!(Table))?;
        Ok(())
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TIER_LIMITS).map_err(map_err!(Table))?;
        txn.open_table(AUDIT_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(USAGE_SAMPLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Append a value to a sequence-keyed table, returning its key.
    fn append_row(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
        value: &[u8],
    ) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            seq = match table.last().map_err(map_err!(Read))? {
                Some((key, _)) => key.value() + 1,
                None => 0,
            };
            table.insert(seq, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// Read every value of a sequence-keyed table in insertion order.
    fn scan<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Tier limits ────────────────────────────────────────────────

    /// Insert or replace the limits row for a tier.
    pub fn put_tier_limits(&self, tier: &Tier) -> StateResult<()> {
        let row = TierLimitsRow::from(tier);
        let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TIER_LIMITS).map_err(map_err!(Table))?;
            table
                .insert(row.tier_name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tier = %row.tier_name, "tier limits stored");
        Ok(())
    }

    pub fn get_tier_limits(&self, tier_name: &str) -> StateResult<Option<TierLimitsRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TIER_LIMITS).map_err(map_err!(Table))?;
        match table.get(tier_name).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: TierLimitsRow =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub fn list_tier_limits(&self) -> StateResult<Vec<TierLimitsRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TIER_LIMITS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: TierLimitsRow =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    // ── Audit trail ────────────────────────────────────────────────

    pub fn put_audit_event(&self, event: &AuditEvent) -> StateResult<u64> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let seq = self.append_row(AUDIT_EVENTS, &value)?;
        debug!(seq, kind = event.kind.as_str(), "audit event stored");
        Ok(seq)
    }

    /// All audit events, oldest first.
    pub fn list_audit_events(&self) -> StateResult<Vec<AuditEvent>> {
        self.scan(AUDIT_EVENTS)
    }

    // ── Usage samples ──────────────────────────────────────────────

    /// Record a sample and prune samples that fell out of retention.
    /// Returns the row key `(timestamp, seq)`.
    pub fn put_usage_sample(&self, sample: &UsageSample) -> StateResult<(u64, u64)> {
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let cutoff = sample.timestamp.saturating_sub(self.usage_retention_secs);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (key, pruned) = {
            let mut table = txn.open_table(USAGE_SAMPLES).map_err(map_err!(Table))?;
            let ts = sample.timestamp;
            let seq = match table
                .range((ts, 0)..=(ts, u64::MAX))
                .map_err(map_err!(Read))?
                .next_back()
            {
                Some(entry) => entry.map_err(map_err!(Read))?.0.value().1 + 1,
                None => 0,
            };
            table.insert((ts, seq), value.as_slice()).map_err(map_err!(Write))?;

            let mut stale = Vec::new();
            for entry in table.range(..(cutoff, 0)).map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                stale.push(k.value());
            }
            for k in &stale {
                table.remove(*k).map_err(map_err!(Write))?;
            }
            ((ts, seq), stale.len())
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if pruned > 0 {
            debug!(pruned, cutoff, "expired usage samples pruned");
        }
        Ok(key)
    }

    /// All retained usage samples, oldest first.
    pub fn list_usage_samples(&self) -> StateResult<Vec<UsageSample>> {
        self.usage_samples_since(0)
    }

    fn usage_samples_since(&self, since: u64) -> StateResult<Vec<UsageSample>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(USAGE_SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range((since, 0)..).map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let sample: UsageSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(sample);
        }
        Ok(results)
    }

    /// Average usage of `tier` over the `window_days` days ending at `now`.
    ///
    /// Returns `None` when no sample for the tier falls inside the window.
    /// Only the window is read.
    pub fn average_usage_at(
        &self,
        tier: &str,
        window_days: u32,
        now: u64,
    ) -> StateResult<Option<UsageAverage>> {
        let since = now.saturating_sub(u64::from(window_days) * SECS_PER_DAY);

        let (mut count, mut tokens, mut requests, mut errors) = (0u64, 0u128, 0u128, 0u128);
        for s in self
            .usage_samples_since(since)?
            .iter()
            .filter(|s| s.active_tier == tier && s.timestamp <= now)
        {
            count += 1;
            tokens += u128::from(s.tokens_used);
            requests += u128::from(s.requests_count);
            errors += u128::from(s.errors_count);
        }

        if count == 0 {
            return Ok(None);
        }
        let n = count as f64;
        Ok(Some(UsageAverage {
            avg_tokens: tokens as f64 / n,
            avg_requests: requests as f64 / n,
            avg_errors: errors as f64 / n,
        }))
    }
}

// ── Collaborator contracts ─────────────────────────────────────────

impl TierLimitStore for StateStore {
    fn upsert_tier_limits<'a>(&'a self, tier: &'a Tier) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.put_tier_limits(tier)
                .map_err(|e| CollaboratorError::new("tier_limits", e.to_string()))
        })
    }

    fn health(&self) -> BoxFuture<'_, CollabResult<()>> {
        Box::pin(async move {
            self.ping()
                .map_err(|e| CollaboratorError::new("tier_limits", e.to_string()))
        })
    }
}

impl AuditSink for StateStore {
    fn append<'a>(&'a self, event: &'a AuditEvent) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.put_audit_event(event)
                .map(|_| ())
                .map_err(|e| CollaboratorError::new("audit", e.to_string()))
        })
    }
}

impl UsageHistory for StateStore {
    fn average_usage<'a>(
        &'a self,
        tier: &'a str,
        window_days: u32,
    ) -> BoxFuture<'a, CollabResult<Option<UsageAverage>>> {
        Box::pin(async move {
            self.average_usage_at(tier, window_days, epoch_secs())
                .map_err(|e| CollaboratorError::new("usage", e.to_string()))
        })
    }

    fn record_usage<'a>(&'a self, sample: &'a UsageSample) -> BoxFuture<'a, CollabResult<()>> {
        Box::pin(async move {
            self.put_usage_sample(sample)
                .map(|_| ())
                .map_err(|e| CollaboratorError::new("usage", e.to_string()))
        })
    }
}
