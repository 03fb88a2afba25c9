//! Run records and the run state machine.
//!
//! ```text
//! pending ──► running ──► completed
//!    │           ├──────► failed
//!    │           ├──────► timeout
//!    └───────────┴──────► cancelled
//! ```
//!
//! Terminal states never transition again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::spec::ResolvedSpec;
use crate::usage::UsageCounters;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Edges of the state machine.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
        )
    }

    /// Edges allowed when a run is settled in memory because storage kept
    /// failing. Adds `pending -> failed` for a claim that could not be
    /// written; no normal transition takes that edge.
    pub fn can_settle_to(self, next: RunState) -> bool {
        self.can_transition_to(next) || matches!((self, next), (Self::Pending, Self::Failed))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(Error::Validation(format!("unknown run state '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured error stored on a failed/timed-out run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunError {
    pub kind: String,
    pub detail: String,
}

impl RunError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChange {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub instance_id: String,
    pub agent_id: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Every state the run has been in, oldest first.
    pub transitions: Vec<StateChange>,
    pub input: Value,
    /// Call-time variables as supplied by the caller.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Free-form caller metadata, stored but never interpreted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub spec: ResolvedSpec,
    pub spec_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageCounters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Run {
    pub fn new(
        spec: ResolvedSpec,
        input: Value,
        variables: BTreeMap<String, Value>,
        created_by: Option<String>,
    ) -> Result<Self> {
        let now = Utc::now();
        let spec_fingerprint = spec.fingerprint()?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            tenant_id: spec.tenant_id.clone(),
            instance_id: spec.instance_id.clone(),
            agent_id: spec.agent_id.clone(),
            state: RunState::Pending,
            created_at: now,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            transitions: vec![StateChange {
                state: RunState::Pending,
                at: now,
            }],
            input,
            variables,
            metadata: BTreeMap::new(),
            spec,
            spec_fingerprint,
            result: None,
            error: None,
            usage: None,
            model_used: None,
            created_by,
        })
    }

    /// Apply a transition that has already been checked against the state
    /// machine. Write-once fields are only filled if still empty.
    pub fn apply(&mut self, t: Transition) {
        let at = Utc::now();
        self.state = t.to;
        self.transitions.push(StateChange { state: t.to, at });

        if t.to == RunState::Running && self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if t.to.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(at);
            let from = self.started_at.unwrap_or(self.created_at);
            self.duration_ms = Some((at - from).num_milliseconds().max(0) as u64);
        }
        if self.result.is_none() {
            self.result = t.result;
        }
        if self.error.is_none() {
            self.error = t.error;
        }
        if self.usage.is_none() {
            self.usage = t.usage;
        }
        if self.model_used.is_none() {
            self.model_used = t.model_used;
        }
    }
}

/// Requested state change plus the write-once fields it produces.
#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub to: RunState,
    pub result: Option<Value>,
    pub error: Option<RunError>,
    pub usage: Option<UsageCounters>,
    pub model_used: Option<String>,
}

impl Transition {
    pub fn to(state: RunState) -> Self {
        Self {
            to: state,
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: RunError) -> Self {
        self.error = Some(error);
        self
    }
}

/// Filters for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub state: Option<RunState>,
    pub instance_id: Option<String>,
    pub agent_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}
