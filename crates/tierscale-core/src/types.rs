//! Data types exchanged between the controller and its collaborators.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Mode ───────────────────────────────────────────────────────────

/// Who drives tier changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// The monitoring driver moves tiers based on metrics.
    Auto,
    /// An operator picks the tier; the driver stays idle.
    Manual,
}

impl ScalingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known scaling mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mode must be either \"auto\" or \"manual\", got {0:?}")]
pub struct ParseModeError(pub String);

impl FromStr for ScalingMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Direction of a tier move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
            Self::None => f.write_str("none"),
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Latest observed load, replaced on every ingestion call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Tokens consumed in the current period.
    pub current_tokens: u64,
    pub requests_today: u64,
    /// Errors per request (0.0–1.0).
    pub error_rate: f64,
    pub response_time_ms: u64,
}

/// Partial metrics pushed by an external reporter. Absent fields are left
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsUpdate {
    pub tokens_used: Option<u64>,
    pub requests_count: Option<u64>,
    pub errors_count: Option<u64>,
    pub response_time_ms: Option<u64>,
}

impl MetricsSnapshot {
    /// Merge an update into this snapshot.
    ///
    /// The error rate is recomputed whenever an error count is supplied,
    /// using the supplied request count or, failing that, the stored one.
    pub fn apply(&mut self, update: &MetricsUpdate) {
        if let Some(tokens) = update.tokens_used {
            self.current_tokens = tokens;
        }
        if let Some(requests) = update.requests_count {
            self.requests_today = requests;
        }
        if let Some(errors) = update.errors_count {
            let requests = update.requests_count.unwrap_or(self.requests_today);
            self.error_rate = errors as f64 / requests.max(1) as f64;
        }
        if let Some(rt) = update.response_time_ms {
            self.response_time_ms = rt;
        }
    }

    /// Error count implied by the current rate, rounded down. Only used when
    /// the exact count was not reported.
    pub fn implied_errors(&self) -> u64 {
        // Absorb representation error so 29/100 * 100 yields 29, not 28.
        (self.error_rate * self.requests_today as f64 + 1e-9).floor() as u64
    }
}

// ── History ────────────────────────────────────────────────────────

/// One applied tier transition. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRecord {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub old_tier: String,
    pub new_tier: String,
    pub mode: ScalingMode,
    pub reason: String,
}

/// Trailing-window usage averages for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UsageAverage {
    pub avg_tokens: f64,
    pub avg_requests: f64,
    pub avg_errors: f64,
}

/// A single persisted usage observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSample {
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub tokens_used: u64,
    pub requests_count: u64,
    pub errors_count: u64,
    pub active_tier: String,
    pub response_time_ms: u64,
}

// ── Audit ──────────────────────────────────────────────────────────

/// Kinds of events written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    ModeChange,
    ModeChangeError,
    ManualTierChange,
    ManualTierChangeError,
    TierScaling,
    AutoScalingError,
    ScalingOperationError,
    ScalingCheckError,
    MetricsUpdateError,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModeChange => "MODE_CHANGE",
            Self::ModeChangeError => "MODE_CHANGE_ERROR",
            Self::ManualTierChange => "MANUAL_TIER_CHANGE",
            Self::ManualTierChangeError => "MANUAL_TIER_CHANGE_ERROR",
            Self::TierScaling => "TIER_SCALING",
            Self::AutoScalingError => "AUTO_SCALING_ERROR",
            Self::ScalingOperationError => "SCALING_OPERATION_ERROR",
            Self::ScalingCheckError => "SCALING_CHECK_ERROR",
            Self::MetricsUpdateError => "METRICS_UPDATE_ERROR",
        }
    }
}

/// An entry for the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub payload: serde_json::Value,
    pub tier_before: Option<String>,
    pub tier_after: Option<String>,
    pub mode: Option<ScalingMode>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            tier_before: None,
            tier_after: None,
            mode: None,
            timestamp: epoch_secs(),
        }
    }

    pub fn with_tiers(mut self, before: &str, after: &str) -> Self {
        self.tier_before = Some(before.to_string());
        self.tier_after = Some(after.to_string());
        self
    }

    pub fn with_mode(mut self, mode: ScalingMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

// ── Cache ──────────────────────────────────────────────────────────

/// Value mirrored into the cache after every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedTier {
    pub tier: String,
    pub mode: ScalingMode,
    pub max_tokens: u64,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
