use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::run::{Run, RunError, RunState};
use crate::usage::UsageCounters;

/// Live update pushed to subscribers of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// Current state on attach. Not a transition; it is what the registry
    /// held at the moment the subscriber connected.
    #[serde(rename = "run.snapshot")]
    Snapshot {
        run_id: Uuid,
        state: RunState,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RunError>,
    },
    #[serde(rename = "run.state")]
    State {
        run_id: Uuid,
        state: RunState,
        at: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RunError>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<UsageCounters>,
    },
    /// Partial result reported by the adapter while running.
    #[serde(rename = "run.progress")]
    Progress { run_id: Uuid, partial: Value },
}

impl RunEvent {
    pub fn snapshot(run: &Run) -> Self {
        Self::Snapshot {
            run_id: run.run_id,
            state: run.state,
            result: run.result.clone(),
            error: run.error.clone(),
        }
    }

    /// The transition event for a run that was just persisted in `run.state`.
    pub fn state_of(run: &Run) -> Self {
        let at = run
            .transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(run.created_at);
        Self::State {
            run_id: run.run_id,
            state: run.state,
            at,
            result: run.result.clone(),
            error: run.error.clone(),
            usage: run.usage,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Snapshot { run_id, .. }
            | Self::State { run_id, .. }
            | Self::Progress { run_id, .. } => *run_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "run.snapshot",
            Self::State { .. } => "run.state",
            Self::Progress { .. } => "run.progress",
        }
    }

    /// True when the event carries a terminal state; streams end after it.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Snapshot { state, .. } | Self::State { state, .. } => state.is_terminal(),
            Self::Progress { .. } => false,
        }
    }
}
