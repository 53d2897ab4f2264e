//! Scaling policy: decides whether and where the active tier should move.
//!
//! Scale-up signals are instantaneous and inclusive: any of token usage,
//! error rate, or response time reaching its threshold is enough. Scale-down
//! is only considered when no scale-up signal fired, and only on sustained
//! evidence from the usage history; with no recorded samples the tier never
//! shrinks.

use serde::Serialize;
use tracing::{debug, warn};

use tierscale_core::{
    epoch_secs, CollaboratorError, MetricsSnapshot, ScaleDirection, ScalingMode, Thresholds,
    TierLadder, UsageHistory,
};

/// Outcome of one evaluation. Transient; produced and consumed per cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub needed: bool,
    pub direction: ScaleDirection,
    pub current_tier: String,
    pub target_tier: Option<String>,
    /// Human-readable reasons, in the order the checks ran.
    pub reasons: Vec<String>,
    /// Metrics the decision was based on.
    pub metrics: MetricsSnapshot,
    /// `current_tokens / max_tokens` of the active tier. Absent in manual mode.
    pub token_usage_ratio: Option<f64>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Set when the usage-history query failed and was treated as no data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_error: Option<CollaboratorError>,
}

impl ScalingDecision {
    fn hold(input: &PolicyInput<'_>, reasons: Vec<String>, ratio: Option<f64>) -> Self {
        Self {
            needed: false,
            direction: ScaleDirection::None,
            current_tier: input.active_tier.to_string(),
            target_tier: None,
            reasons,
            metrics: input.metrics.clone(),
            token_usage_ratio: ratio,
            timestamp: epoch_secs(),
            history_error: None,
        }
    }
}

/// The slice of controller state the policy reads.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub mode: ScalingMode,
    pub active_tier: &'a str,
    pub metrics: &'a MetricsSnapshot,
}

/// Evaluate the scaling policy.
///
/// The only side effect is the usage-history query made when a scale down
/// is possible. A failing query counts as "no data".
pub async fn evaluate(
    input: &PolicyInput<'_>,
    ladder: &TierLadder,
    thresholds: &Thresholds,
    history: &dyn UsageHistory,
) -> ScalingDecision {
    if input.mode == ScalingMode::Manual {
        return ScalingDecision::hold(input, vec!["Manual mode active".to_string()], None);
    }

    let Some(tier) = ladder.get(input.active_tier) else {
        warn!(tier = %input.active_tier, "active tier is not on the ladder");
        return ScalingDecision::hold(
            input,
            vec![format!("Tier \"{}\" is not on the ladder", input.active_tier)],
            None,
        );
    };

    let metrics = input.metrics;
    let ratio = token_usage_ratio(metrics.current_tokens, tier.max_tokens);
    let mut reasons = Vec::new();

    if ratio >= thresholds.token_usage {
        reasons.push(format!(
            "Token usage {:.1}% exceeds {:.0}% threshold",
            ratio * 100.0,
            thresholds.token_usage * 100.0
        ));
    }
    if metrics.error_rate >= thresholds.error_rate {
        reasons.push(format!(
            "Error rate {:.1}% exceeds {:.0}% threshold",
            metrics.error_rate * 100.0,
            thresholds.error_rate * 100.0
        ));
    }
    if metrics.response_time_ms >= thresholds.response_time_ms {
        reasons.push(format!(
            "Response time {}ms exceeds {}ms threshold",
            metrics.response_time_ms, thresholds.response_time_ms
        ));
    }

    if !reasons.is_empty() {
        let Some(next) = ladder.next(&tier.name) else {
            reasons.push("Already at highest tier".to_string());
            debug!(tier = %tier.name, "scale up wanted but already at the top");
            return ScalingDecision::hold(input, reasons, Some(ratio));
        };
        debug!(from = %tier.name, to = %next.name, ?reasons, "scale up");
        return ScalingDecision {
            needed: true,
            direction: ScaleDirection::Up,
            current_tier: tier.name.clone(),
            target_tier: Some(next.name.clone()),
            reasons,
            metrics: metrics.clone(),
            token_usage_ratio: Some(ratio),
            timestamp: epoch_secs(),
            history_error: None,
        };
    }

    let Some(lower) = ladder.previous(&tier.name) else {
        return ScalingDecision::hold(input, reasons, Some(ratio));
    };

    let average = match history
        .average_usage(&tier.name, thresholds.scale_down_window_days)
        .await
    {
        Ok(avg) => avg,
        Err(e) => {
            warn!(tier = %tier.name, error = %e, "usage history query failed");
            let mut decision = ScalingDecision::hold(input, reasons, Some(ratio));
            decision.history_error = Some(e);
            return decision;
        }
    };

    let Some(average) = average else {
        debug!(tier = %tier.name, "no usage history, not scaling down");
        return ScalingDecision::hold(input, reasons, Some(ratio));
    };

    // Against the lower tier's budget: would we fit comfortably there?
    let lower_ratio = average.avg_tokens / lower.max_tokens as f64;
    if lower_ratio < thresholds.scale_down_usage {
        debug!(from = %tier.name, to = %lower.name, lower_ratio, "scale down");
        return ScalingDecision {
            needed: true,
            direction: ScaleDirection::Down,
            current_tier: tier.name.clone(),
            target_tier: Some(lower.name.clone()),
            reasons: vec!["Sustained low usage allows scale down".to_string()],
            metrics: metrics.clone(),
            token_usage_ratio: Some(ratio),
            timestamp: epoch_secs(),
            history_error: None,
        };
    }

    ScalingDecision::hold(input, reasons, Some(ratio))
}

/// `current / max`, with a zero budget counting as always over.
fn token_usage_ratio(current: u64, max: u64) -> f64 {
    if max == 0 {
        return f64::INFINITY;
    }
    current as f64 / max as f64
}
