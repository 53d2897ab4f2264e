//! tierscale-controller: the scaling decision-and-transition engine.
//!
//! Moves a metered service between capacity tiers, either automatically
//! from observed load or on operator request.
//!
//! # Components
//!
//! - **`policy`**: pure evaluator: (state, ladder, usage history) → decision
//! - **`controller`**: owns Controller State and applies transitions under
//!   a non-blocking single-flight guard
//! - **`history`**: bounded FIFO of applied transitions
//! - **`events`**: broadcast channel for tier, mode, and metrics notifications
//! - **`monitor`**: periodic driver, cancellable through a watch channel
//!
//! # Scaling Policy
//!
//! ```text
//! mode == manual                        → no change
//! tokens / tier.max_tokens >= 0.80  ┐
//! error_rate               >= 0.05  ├─ any → up one tier (no-op at the top)
//! response_time_ms         >= 5000  ┘
//! none of the above, not at the bottom:
//!   avg_tokens(tier, 7d) / lower.max_tokens < 0.60 → down one tier
//! ```
//!
//! Scale-down needs recorded history: with no samples the tier never shrinks.

pub mod controller;
pub mod error;
pub mod events;
pub mod history;
pub mod monitor;
pub mod policy;

pub use controller::{
    ActiveTier, AutoScaleOutcome, Collaborators, Controller, ControllerStatus, HealthReport,
    HealthStatus, MetricsUpdateOutcome, MetricsView, ModeChange, TierInfo, TransitionOutcome,
    DEFAULT_HISTORY_LIMIT,
};
pub use error::{ControllerError, ControllerResult};
pub use events::{ControllerEvent, EventBus};
pub use history::ScalingHistory;
pub use monitor::{Monitor, MonitorHandle, SkipReason, TickOutcome};
pub use policy::{evaluate, PolicyInput, ScalingDecision};
