use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumption counters reported by an adapter for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageCounters {
    pub input_units: u64,
    pub output_units: u64,
    /// Derived cost in USD.
    #[serde(default)]
    pub cost: f64,
}

impl UsageCounters {
    pub fn total_units(&self) -> u64 {
        self.input_units + self.output_units
    }

    pub fn add(&mut self, other: &UsageCounters) {
        self.input_units += other.input_units;
        self.output_units += other.output_units;
        self.cost += other.cost;
    }
}

/// One append-only usage row. `dedup_key` makes recording idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub dedup_key: String,
    pub tenant_id: String,
    pub run_id: Uuid,
    pub agent_id: String,
    pub provider: String,
    pub model_id: String,
    pub counters: UsageCounters,
    /// `execution`, `tool_call`, ...
    pub usage_type: String,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Stable dedup key for a run transition, e.g. `"<run_id>:completed"`.
    pub fn key_for(run_id: &Uuid, transition: &str) -> String {
        format!("{run_id}:{transition}")
    }
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ModelUsage {
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub calls: u64,
}

/// Per-tenant usage analytics over an optional time window.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct UsageSummary {
    pub tenant_id: String,
    pub totals: UsageCounters,
    pub total_calls: u64,
    /// Keyed by `provider:model_id`.
    pub by_model: BTreeMap<String, ModelUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}
