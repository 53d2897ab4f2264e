//! Controller: owns the tier state and performs transitions.
//!
//! All mutation goes through this type. Transitions (automatic or manual)
//! are single-flight: a second attempt while one is running is rejected
//! with `ControllerError::AlreadyScaling`, never queued. The in-memory
//! update (tier, history, last scale time) happens before any collaborator
//! is called, and the guard is released when the transition returns,
//! whatever the collaborators did.
//!
//! Collaborator failures are split in two:
//! - advisory (cache mirror, audit log, usage recording): logged and
//!   returned as `warnings` on an otherwise successful outcome
//! - propagating (tier-limit store): returned as
//!   `ControllerError::Persistence`, which still carries the applied outcome

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use tierscale_core::{
    epoch_secs, AuditEvent, AuditEventKind, AuditSink, CacheMirror, CachedTier, CollaboratorError,
    ConfigError, ControllerConfig, MetricsSnapshot, MetricsUpdate, ScaleDirection, ScalingMode,
    ScalingRecord, Tier, TierLadder, TierLimitStore, UsageHistory, UsageSample,
};

use crate::error::{ControllerError, ControllerResult};
use crate::events::{ControllerEvent, EventBus};
use crate::history::ScalingHistory;
use crate::policy::{self, PolicyInput, ScalingDecision};

const STATUS_HISTORY_LEN: usize = 10;

/// Page size for [`Controller::scaling_history`] when the caller has none.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// External collaborators the controller calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub tier_limits: Arc<dyn TierLimitStore>,
    pub cache: Arc<dyn CacheMirror>,
    pub audit: Arc<dyn AuditSink>,
    pub usage: Arc<dyn UsageHistory>,
}

/// Mutable controller state. The in-progress flag lives beside it in
/// [`Controller`] so it can be claimed without taking the lock.
#[derive(Debug, Clone)]
struct ControllerState {
    mode: ScalingMode,
    active_tier: String,
    max_tokens: u64,
    metrics: MetricsSnapshot,
    last_scale_time: Option<u64>,
    history: ScalingHistory,
}

/// Current metrics plus the context they were observed in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsView {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub max_tokens: u64,
    pub mode: ScalingMode,
    pub active_tier: String,
    pub last_scale_time: Option<u64>,
    pub timestamp: u64,
}

/// The active tier and what it grants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveTier {
    pub tier: String,
    pub mode: ScalingMode,
    pub max_tokens: u64,
    pub capabilities: BTreeSet<String>,
    pub monthly_cost: f64,
    pub timestamp: u64,
}

/// Read-only projection of the whole controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub mode: ScalingMode,
    pub active_tier: String,
    pub in_progress: bool,
    pub metrics: MetricsView,
    /// Most recent transitions, oldest first.
    pub recent_history: Vec<ScalingRecord>,
    pub timestamp: u64,
}

/// A ladder entry annotated with whether it is active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierInfo {
    #[serde(flatten)]
    pub tier: Tier,
    pub is_active: bool,
}

/// Result of an applied transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub record: ScalingRecord,
    pub direction: ScaleDirection,
    /// State after the transition.
    pub active: ActiveTier,
    /// Advisory collaborator failures.
    pub warnings: Vec<CollaboratorError>,
}

/// Result of a mode change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeChange {
    pub old_mode: ScalingMode,
    pub new_mode: ScalingMode,
    pub timestamp: u64,
    pub warnings: Vec<CollaboratorError>,
}

/// Result of a metrics ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsUpdateOutcome {
    pub metrics: MetricsView,
    pub warnings: Vec<CollaboratorError>,
}

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Reachability of the collaborators the controller cannot work without.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Tier-limit store answered.
    pub database: bool,
    /// Cache mirror answered.
    pub cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
}

/// Result of one automatic scaling step.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoScaleOutcome {
    /// The policy asked for a move and it was applied.
    Scaled {
        decision: ScalingDecision,
        outcome: TransitionOutcome,
    },
    /// The policy found nothing to do.
    NotNeeded(ScalingDecision),
}

/// Claim on the single-flight flag. Releases it on drop.
struct ScalingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ScalingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for ScalingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The tier controller.
pub struct Controller {
    config: ControllerConfig,
    ladder: TierLadder,
    state: RwLock<ControllerState>,
    in_progress: AtomicBool,
    collaborators: Collaborators,
    events: EventBus,
}

impl Controller {
    /// Build a controller from a validated configuration.
    pub fn new(config: ControllerConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let ladder = config.ladder()?;
        let max_tokens = ladder
            .get(&config.initial_tier)
            .map(|t| t.max_tokens)
            .ok_or_else(|| ConfigError::UnknownInitialTier(config.initial_tier.clone()))?;

        let state = ControllerState {
            mode: config.initial_mode,
            active_tier: config.initial_tier.clone(),
            max_tokens,
            metrics: MetricsSnapshot::default(),
            last_scale_time: None,
            history: ScalingHistory::new(config.history_capacity),
        };

        info!(
            tier = %state.active_tier,
            mode = %state.mode,
            tiers = ladder.len(),
            "tier controller initialized"
        );

        Ok(Self {
            config,
            ladder,
            state: RwLock::new(state),
            in_progress: AtomicBool::new(false),
            collaborators,
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn ladder(&self) -> &TierLadder {
        &self.ladder
    }

    /// Subscribe to tier, mode, and metrics notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    /// Whether a transition is currently running.
    pub fn is_scaling(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub async fn mode(&self) -> ScalingMode {
        self.state.read().await.mode
    }

    // ── Mode ───────────────────────────────────────────────────────

    /// Switch between automatic and manual mode. Does not touch the tier.
    pub async fn set_mode(&self, mode: &str) -> ControllerResult<ModeChange> {
        let new_mode: ScalingMode = match mode.parse() {
            Ok(m) => m,
            Err(e) => {
                warn!(%mode, "rejected mode change");
                self.audit_best_effort(AuditEvent::new(
                    AuditEventKind::ModeChangeError,
                    json!({ "error": format!("{e}") }),
                ))
                .await;
                return Err(ControllerError::InvalidMode(e));
            }
        };

        let old_mode = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut state.mode, new_mode)
        };
        let timestamp = epoch_secs();
        info!(old = %old_mode, new = %new_mode, "scaling mode changed");

        let mut warnings = Vec::new();
        let event = AuditEvent::new(
            AuditEventKind::ModeChange,
            json!({ "old_mode": old_mode, "new_mode": new_mode, "timestamp": timestamp }),
        )
        .with_mode(new_mode);
        if let Err(e) = self.collaborators.audit.append(&event).await {
            warn!(error = %e, "failed to audit mode change");
            warnings.push(e);
        }

        self.events.publish(ControllerEvent::ModeChanged {
            old_mode,
            new_mode,
            timestamp,
        });

        Ok(ModeChange {
            old_mode,
            new_mode,
            timestamp,
            warnings,
        })
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Merge reported metrics into the current snapshot and record a usage
    /// sample for the history.
    pub async fn update_metrics(&self, update: &MetricsUpdate) -> MetricsUpdateOutcome {
        let (view, sample) = {
            let mut state = self.state.write().await;
            state.metrics.apply(update);
            let view = metrics_view(&state);
            let sample = UsageSample {
                timestamp: view.timestamp,
                tokens_used: state.metrics.current_tokens,
                requests_count: state.metrics.requests_today,
                errors_count: update
                    .errors_count
                    .unwrap_or_else(|| state.metrics.implied_errors()),
                active_tier: state.active_tier.clone(),
                response_time_ms: state.metrics.response_time_ms,
            };
            (view, sample)
        };
        debug!(
            tokens = view.snapshot.current_tokens,
            error_rate = view.snapshot.error_rate,
            response_time_ms = view.snapshot.response_time_ms,
            "metrics updated"
        );

        let mut warnings = Vec::new();
        if let Err(e) = self.collaborators.usage.record_usage(&sample).await {
            warn!(error = %e, "failed to record usage sample");
            self.audit_best_effort(AuditEvent::new(
                AuditEventKind::MetricsUpdateError,
                json!({ "tier": sample.active_tier, "error": e.to_string() }),
            ))
            .await;
            warnings.push(e);
        }

        self.events.publish(ControllerEvent::MetricsUpdated(view.clone()));

        MetricsUpdateOutcome {
            metrics: view,
            warnings,
        }
    }

    // ── Evaluation and transitions ─────────────────────────────────

    /// Run the scaling policy against the current state.
    pub async fn check_scaling_needs(&self) -> ScalingDecision {
        let (mode, active_tier, metrics) = {
            let state = self.state.read().await;
            (state.mode, state.active_tier.clone(), state.metrics.clone())
        };
        let input = PolicyInput {
            mode,
            active_tier: &active_tier,
            metrics: &metrics,
        };
        let decision = policy::evaluate(
            &input,
            &self.ladder,
            &self.config.thresholds,
            self.collaborators.usage.as_ref(),
        )
        .await;

        if let Some(e) = &decision.history_error {
            self.audit_best_effort(AuditEvent::new(
                AuditEventKind::ScalingCheckError,
                json!({ "tier": active_tier, "error": e.to_string() }),
            ))
            .await;
        }
        decision
    }

    /// Apply a decision the caller has already checked is needed.
    pub async fn apply_decision(
        &self,
        decision: &ScalingDecision,
        mode: ScalingMode,
    ) -> ControllerResult<TransitionOutcome> {
        let target_name = match (&decision.target_tier, decision.needed) {
            (Some(t), true) => t,
            _ => return Err(ControllerError::NotNeeded),
        };
        let target = self
            .ladder
            .get(target_name)
            .ok_or_else(|| ControllerError::UnknownTier(target_name.clone()))?;

        let Some(_guard) = ScalingGuard::acquire(&self.in_progress) else {
            debug!(target = %target.name, "transition rejected, already scaling");
            return Err(ControllerError::AlreadyScaling);
        };

        let reason = match mode {
            ScalingMode::Auto if decision.reasons.is_empty() => "Automatic scaling".to_string(),
            ScalingMode::Auto => format!("Automatic scaling: {}", decision.reasons.join("; ")),
            ScalingMode::Manual => "Manual tier selection".to_string(),
        };
        self.transition(target, mode, reason, AuditEventKind::TierScaling)
            .await
    }

    /// Move to `tier_name` on operator request. Manual mode only.
    pub async fn select_tier_manually(&self, tier_name: &str) -> ControllerResult<TransitionOutcome> {
        if self.mode().await != ScalingMode::Manual {
            let err = ControllerError::ManualModeRequired;
            self.audit_rejection(AuditEventKind::ManualTierChangeError, tier_name, &err)
                .await;
            return Err(err);
        }
        let Some(target) = self.ladder.get(tier_name) else {
            let err = ControllerError::UnknownTier(tier_name.to_string());
            self.audit_rejection(AuditEventKind::ManualTierChangeError, tier_name, &err)
                .await;
            return Err(err);
        };

        let Some(_guard) = ScalingGuard::acquire(&self.in_progress) else {
            return Err(ControllerError::AlreadyScaling);
        };

        self.transition(
            target,
            ScalingMode::Manual,
            "Manual tier selection".to_string(),
            AuditEventKind::ManualTierChange,
        )
        .await
    }

    /// Evaluate and, if the policy asks for it, apply an automatic move.
    pub async fn execute_auto_scaling(&self) -> ControllerResult<AutoScaleOutcome> {
        if self.is_scaling() {
            return Err(ControllerError::AlreadyScaling);
        }

        let decision = self.check_scaling_needs().await;
        if !decision.needed {
            return Ok(AutoScaleOutcome::NotNeeded(decision));
        }

        match self.apply_decision(&decision, ScalingMode::Auto).await {
            Ok(outcome) => Ok(AutoScaleOutcome::Scaled { decision, outcome }),
            Err(e) => {
                if !matches!(e, ControllerError::AlreadyScaling) {
                    self.audit_best_effort(AuditEvent::new(
                        AuditEventKind::AutoScalingError,
                        json!({ "error": e.to_string() }),
                    ))
                    .await;
                }
                Err(e)
            }
        }
    }

    /// Shared transition path. The caller holds the scaling guard.
    async fn transition(
        &self,
        target: &Tier,
        mode: ScalingMode,
        reason: String,
        audit_kind: AuditEventKind,
    ) -> ControllerResult<TransitionOutcome> {
        let now = epoch_secs();

        let (record, active, cached) = {
            let mut state = self.state.write().await;
            let record = ScalingRecord {
                timestamp: now,
                old_tier: std::mem::replace(&mut state.active_tier, target.name.clone()),
                new_tier: target.name.clone(),
                mode,
                reason,
            };
            state.max_tokens = target.max_tokens;
            state.last_scale_time = Some(now);
            state.history.push(record.clone());

            let active = active_tier(&state, target);
            let cached = CachedTier {
                tier: target.name.clone(),
                mode: state.mode,
                max_tokens: target.max_tokens,
                timestamp: now,
            };
            (record, active, cached)
        };

        let direction = self.direction_between(&record.old_tier, &record.new_tier);
        info!(
            old_tier = %record.old_tier,
            new_tier = %record.new_tier,
            %mode,
            %direction,
            "tier changed"
        );

        self.events.publish(ControllerEvent::TierChanged {
            old_tier: record.old_tier.clone(),
            new_tier: record.new_tier.clone(),
            mode,
            timestamp: now,
        });

        let persisted = self.collaborators.tier_limits.upsert_tier_limits(target).await;

        let mut warnings = Vec::new();
        if let Err(e) = self
            .collaborators
            .cache
            .set_current_tier(&self.config.cache.key, &cached, self.config.cache.ttl_secs)
            .await
        {
            warn!(error = %e, "failed to refresh tier cache");
            warnings.push(e);
        }

        let event = AuditEvent::new(
            audit_kind,
            json!({
                "old_tier": record.old_tier,
                "new_tier": record.new_tier,
                "mode": mode,
                "reason": record.reason,
                "scaling_direction": direction,
                "timestamp": now,
            }),
        )
        .with_tiers(&record.old_tier, &record.new_tier)
        .with_mode(mode);
        if let Err(e) = self.collaborators.audit.append(&event).await {
            warn!(error = %e, "failed to audit tier change");
            warnings.push(e);
        }

        let outcome = TransitionOutcome {
            record,
            direction,
            active,
            warnings,
        };

        if let Err(source) = persisted {
            error!(
                tier = %outcome.record.new_tier,
                error = %source,
                "failed to persist tier limits"
            );
            self.audit_best_effort(
                AuditEvent::new(
                    AuditEventKind::ScalingOperationError,
                    json!({
                        "old_tier": outcome.record.old_tier,
                        "new_tier": outcome.record.new_tier,
                        "error": source.to_string(),
                    }),
                )
                .with_tiers(&outcome.record.old_tier, &outcome.record.new_tier)
                .with_mode(mode),
            )
            .await;
            return Err(ControllerError::Persistence {
                outcome: Box::new(outcome),
                source,
            });
        }

        Ok(outcome)
    }

    fn direction_between(&self, old: &str, new: &str) -> ScaleDirection {
        match (self.ladder.position(old), self.ladder.position(new)) {
            (Some(o), Some(n)) if n > o => ScaleDirection::Up,
            (Some(o), Some(n)) if n < o => ScaleDirection::Down,
            _ => ScaleDirection::None,
        }
    }

    async fn audit_rejection(&self, kind: AuditEventKind, tier: &str, err: &ControllerError) {
        warn!(%tier, error = %err, "rejected tier selection");
        self.audit_best_effort(AuditEvent::new(
            kind,
            json!({ "tier": tier, "error": err.to_string() }),
        ))
        .await;
    }

    async fn audit_best_effort(&self, event: AuditEvent) {
        if let Err(e) = self.collaborators.audit.append(&event).await {
            warn!(kind = event.kind.as_str(), error = %e, "failed to write audit event");
        }
    }

    // ── Introspection ──────────────────────────────────────────────

    /// Check that the tier-limit store and the cache mirror answer.
    pub async fn health_check(&self) -> HealthReport {
        let (database, cache) = tokio::join!(
            self.collaborators.tier_limits.health(),
            self.collaborators.cache.health(),
        );
        let errors: Vec<String> = [&database, &cache]
            .into_iter()
            .filter_map(|r| r.as_ref().err().map(ToString::to_string))
            .collect();

        let report = HealthReport {
            status: if errors.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            database: database.is_ok(),
            cache: cache.is_ok(),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            timestamp: epoch_secs(),
        };
        if let Some(e) = &report.error {
            warn!(error = %e, "health check failed");
        }
        report
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.state.read().await;
        ControllerStatus {
            mode: state.mode,
            active_tier: state.active_tier.clone(),
            in_progress: self.is_scaling(),
            metrics: metrics_view(&state),
            recent_history: state.history.last(STATUS_HISTORY_LEN),
            timestamp: epoch_secs(),
        }
    }

    pub async fn current_metrics(&self) -> MetricsView {
        metrics_view(&*self.state.read().await)
    }

    pub async fn active_tier(&self) -> ActiveTier {
        let state = self.state.read().await;
        match self.ladder.get(&state.active_tier) {
            Some(tier) => active_tier(&state, tier),
            None => ActiveTier {
                tier: state.active_tier.clone(),
                mode: state.mode,
                max_tokens: state.max_tokens,
                capabilities: BTreeSet::new(),
                monthly_cost: 0.0,
                timestamp: epoch_secs(),
            },
        }
    }

    /// The last `limit` transitions, oldest first.
    pub async fn scaling_history(&self, limit: usize) -> Vec<ScalingRecord> {
        self.state.read().await.history.last(limit)
    }

    pub fn available_tiers(&self) -> Vec<Tier> {
        self.ladder.tiers().to_vec()
    }

    pub async fn tier_info(&self, name: &str) -> ControllerResult<TierInfo> {
        let tier = self
            .ladder
            .get(name)
            .ok_or_else(|| ControllerError::UnknownTier(name.to_string()))?;
        let is_active = self.state.read().await.active_tier == name;
        Ok(TierInfo {
            tier: tier.clone(),
            is_active,
        })
    }
}

fn metrics_view(state: &ControllerState) -> MetricsView {
    MetricsView {
        snapshot: state.metrics.clone(),
        max_tokens: state.max_tokens,
        mode: state.mode,
        active_tier: state.active_tier.clone(),
        last_scale_time: state.last_scale_time,
        timestamp: epoch_secs(),
    }
}

fn active_tier(state: &ControllerState, tier: &Tier) -> ActiveTier {
    ActiveTier {
        tier: tier.name.clone(),
        mode: state.mode,
        max_tokens: state.max_tokens,
        capabilities: tier.capabilities.clone(),
        monthly_cost: tier.monthly_cost,
        timestamp: epoch_secs(),
    }
}
