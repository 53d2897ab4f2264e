//! Notification channel for controller events.
//!
//! Delivery is fire-and-forget: publishing with no subscribers is not an
//! error, and a subscriber that falls more than the channel capacity behind
//! loses the oldest events. Nothing is replayed to late subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use tierscale_core::ScalingMode;

use crate::controller::MetricsView;

const CHANNEL_CAPACITY: usize = 64;

/// Something subscribers may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    TierChanged {
        old_tier: String,
        new_tier: String,
        mode: ScalingMode,
        timestamp: u64,
    },
    ModeChanged {
        old_mode: ScalingMode,
        new_mode: ScalingMode,
        timestamp: u64,
    },
    MetricsUpdated(MetricsView),
}

/// Publisher side of the notification channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ControllerEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
