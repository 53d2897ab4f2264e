//! End-to-end tests: controller wired to the redb state store and the TTL
//! tier cache.
//!
//! Covers:
//! 1. Automatic scale up persists limits, refreshes the cache, and audits
//! 2. Sustained low usage in the store drives a scale down
//! 3. Manual override flow, including the monitor staying idle
//! 4. Status projections after a sequence of transitions
//! 5. Health check against the real store and cache

use std::sync::{Arc, Once};
use std::time::Duration;

use tierscale_controller::{
    AutoScaleOutcome, Collaborators, Controller, ControllerError, HealthStatus, Monitor,
    SkipReason, TickOutcome,
};
use tierscale_core::{
    epoch_secs, AuditEventKind, ControllerConfig, MetricsUpdate, ScaleDirection, ScalingMode,
    UsageSample,
};
use tierscale_state::{StateStore, TierCache};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=tierscale_controller=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Harness ──────────────────────────────────────────────────────

struct Harness {
    controller: Arc<Controller>,
    store: StateStore,
    cache: TierCache,
}

fn harness(mode: ScalingMode, tier: &str) -> anyhow::Result<Harness> {
    init_tracing();
    let store = StateStore::open_in_memory()?;
    let cache = TierCache::new();
    let collaborators = Collaborators {
        tier_limits: Arc::new(store.clone()),
        cache: Arc::new(cache.clone()),
        audit: Arc::new(store.clone()),
        usage: Arc::new(store.clone()),
    };
    let config = ControllerConfig {
        initial_mode: mode,
        initial_tier: tier.to_string(),
        ..Default::default()
    };
    let controller = Arc::new(Controller::new(config, collaborators)?);
    Ok(Harness {
        controller,
        store,
        cache,
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn scale_up_reaches_every_collaborator() -> anyhow::Result<()> {
    let h = harness(ScalingMode::Auto, "free")?;

    h.controller
        .update_metrics(&MetricsUpdate {
            tokens_used: Some(90_000),
            requests_count: Some(1_000),
            errors_count: Some(5),
            response_time_ms: Some(300),
        })
        .await;

    let AutoScaleOutcome::Scaled { decision, outcome } = h.controller.execute_auto_scaling().await?
    else {
        panic!("expected a scale up");
    };
    assert_eq!(decision.direction, ScaleDirection::Up);
    assert!(outcome.warnings.is_empty());

    let limits = h.store.get_tier_limits("pyme")?.expect("limits persisted");
    assert_eq!(limits.max_tokens, 500_000);
    assert_eq!(limits.max_teams, 20);

    let cached = h.cache.get("current_tier").await.expect("tier cached");
    assert_eq!(cached.tier, "pyme");
    assert_eq!(cached.mode, ScalingMode::Auto);
    assert_eq!(cached.max_tokens, 500_000);

    let audit = h.store.list_audit_events()?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditEventKind::TierScaling);
    assert_eq!(audit[0].payload["scaling_direction"], "up");
    assert_eq!(audit[0].tier_before.as_deref(), Some("free"));

    let samples = h.store.list_usage_samples()?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].errors_count, 5);
    Ok(())
}

#[tokio::test]
async fn stored_history_drives_scale_down() -> anyhow::Result<()> {
    let h = harness(ScalingMode::Auto, "mediana")?;
    let now = epoch_secs();
    for tokens in [200_000, 300_000, 250_000] {
        h.store.put_usage_sample(&UsageSample {
            timestamp: now,
            tokens_used: tokens,
            requests_count: 100,
            errors_count: 0,
            active_tier: "mediana".to_string(),
            response_time_ms: 150,
        })?;
    }
    // Outside the seven day window; would keep the average high.
    h.store.put_usage_sample(&UsageSample {
        timestamp: now - 30 * 86_400,
        tokens_used: 5_000_000,
        requests_count: 100,
        errors_count: 0,
        active_tier: "mediana".to_string(),
        response_time_ms: 150,
    })?;

    let decision = h.controller.check_scaling_needs().await;
    assert!(decision.needed);
    assert_eq!(decision.target_tier.as_deref(), Some("pyme"));

    let AutoScaleOutcome::Scaled { outcome, .. } = h.controller.execute_auto_scaling().await? else {
        panic!("expected a scale down");
    };
    assert_eq!(outcome.direction, ScaleDirection::Down);
    assert_eq!(h.controller.active_tier().await.max_tokens, 500_000);
    Ok(())
}

#[tokio::test]
async fn manual_override_flow() -> anyhow::Result<()> {
    let h = harness(ScalingMode::Auto, "free")?;
    let monitor = Monitor::new(h.controller.clone(), Duration::from_secs(30));

    assert!(matches!(
        h.controller.select_tier_manually("enterprise").await,
        Err(ControllerError::ManualModeRequired)
    ));

    h.controller.set_mode("manual").await?;
    h.controller
        .update_metrics(&MetricsUpdate {
            tokens_used: Some(99_000),
            ..Default::default()
        })
        .await;
    assert_eq!(monitor.tick().await, TickOutcome::Skipped(SkipReason::ManualMode));
    assert_eq!(h.controller.status().await.active_tier, "free");

    let outcome = h.controller.select_tier_manually("enterprise").await?;
    assert_eq!(outcome.record.reason, "Manual tier selection");
    assert!(h.store.get_tier_limits("enterprise")?.is_some());

    h.controller.set_mode("auto").await?;
    assert_eq!(monitor.tick().await, TickOutcome::Idle);

    let kinds: Vec<_> = h.store.list_audit_events()?.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::ManualTierChangeError,
            AuditEventKind::ModeChange,
            AuditEventKind::ManualTierChange,
            AuditEventKind::ModeChange,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn status_reflects_transitions() -> anyhow::Result<()> {
    let h = harness(ScalingMode::Manual, "free")?;

    for tier in ["pyme", "mediana", "enterprise", "mediana"] {
        h.controller.select_tier_manually(tier).await?;
    }

    let status = h.controller.status().await;
    assert_eq!(status.active_tier, "mediana");
    assert_eq!(status.mode, ScalingMode::Manual);
    assert_eq!(status.recent_history.len(), 4);
    assert_eq!(status.recent_history[0].new_tier, "pyme");
    assert_eq!(status.metrics.max_tokens, 2_000_000);

    let last_two = h.controller.scaling_history(2).await;
    assert_eq!(last_two[0].new_tier, "enterprise");
    assert_eq!(last_two[1].new_tier, "mediana");

    assert!(h.controller.tier_info("mediana").await?.is_active);
    assert_eq!(h.store.list_tier_limits()?.len(), 3);

    let json = serde_json::to_value(&status)?;
    assert_eq!(json["metrics"]["active_tier"], "mediana");
    Ok(())
}

#[tokio::test]
async fn health_check_reaches_store_and_cache() -> anyhow::Result<()> {
    let h = harness(ScalingMode::Auto, "free")?;

    let report = h.controller.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.database);
    assert!(report.cache);
    assert!(report.error.is_none());
    Ok(())
}
