use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence / tenant routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory. The master registry lives in `<state_path>/master`,
    /// each tenant partition in `<state_path>/partitions/<partition>`.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Prefix for partition names (`<prefix><tenant_id>`).
    #[serde(default = "d_partition_prefix")]
    pub partition_prefix: String,
    /// When true, partitions exist only for registered tenants and unknown
    /// ids fail with `TenantNotFound`. When false, partitions for unknown
    /// ids are created lazily (no tenant record is ever created).
    #[serde(default = "d_true")]
    pub strict_tenants: bool,
    /// Attempts for a storage write before giving up (min 1).
    #[serde(default = "d_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "d_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            partition_prefix: d_partition_prefix(),
            strict_tenants: true,
            retry_attempts: d_retry_attempts(),
            retry_base_delay_ms: d_retry_base_delay_ms(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_partition_prefix() -> String {
    "project-".into()
}
fn d_true() -> bool {
    true
}
fn d_retry_attempts() -> u32 {
    3
}
fn d_retry_base_delay_ms() -> u64 {
    50
}
