//! Append-only event stream (§6 UI interface), generalized from the
//! teacher's `events::bus::EventBus` / `events::types::EnsembleEvent`
//! broadcast-channel pattern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GaoEvent {
    PlanStarted {
        epic_num: i64,
        scale_level: u8,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        epic_num: i64,
        step_name: String,
        timestamp: DateTime<Utc>,
    },
    StepFinished {
        epic_num: i64,
        step_name: String,
        outcome: String,
        timestamp: DateTime<Utc>,
    },
    CeremonyHeld {
        epic_num: i64,
        ceremony_type: String,
        outcome: String,
        timestamp: DateTime<Utc>,
    },
    ArtifactCommitted {
        epic_num: i64,
        path: String,
        sha: String,
        timestamp: DateTime<Utc>,
    },
    PlanFinished {
        epic_num: i64,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl GaoEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PlanStarted { timestamp, .. }
            | Self::StepStarted { timestamp, .. }
            | Self::StepFinished { timestamp, .. }
            | Self::CeremonyHeld { timestamp, .. }
            | Self::ArtifactCommitted { timestamp, .. }
            | Self::PlanFinished { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanStarted { .. } => "plan-started",
            Self::StepStarted { .. } => "step-started",
            Self::StepFinished { .. } => "step-finished",
            Self::CeremonyHeld { .. } => "ceremony-held",
            Self::ArtifactCommitted { .. } => "artifact-committed",
            Self::PlanFinished { .. } => "plan-finished",
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for plan/step/ceremony events. Subscribers (the external
/// UI layer) see events strictly in §5 ordering; the bus itself performs no
/// persistence — the Store persists ceremonies/artifacts directly via the
/// StateCoordinator, so there's no need to double-write events to disk.
pub struct EventBus {
    sender: broadcast::Sender<GaoEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared() -> SharedEventBus {
        Arc::new(Self::new())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GaoEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GaoEvent) {
        debug!(kind = event.kind(), "publishing event");
        // A broadcast send fails only when there are no subscribers; that's
        // fine, the event stream is fire-and-forget for an idle UI.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
