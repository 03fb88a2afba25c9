use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission control and run deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum number of runs in `running` at once. Clamped to `1..=256`.
    #[serde(default = "d_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Deadline applied when neither the instance nor the template sets one.
    #[serde(default = "d_default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// How long a synchronous `createRun` waits for a terminal state before
    /// returning the pending/running snapshot.
    #[serde(default = "d_sync_wait_secs")]
    pub sync_wait_secs: u64,
    /// Per-subscriber event buffer. Clamped to `8..=4096`.
    #[serde(default = "d_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Grace period given to an adapter after a cancel/timeout signal before
    /// its task is aborted.
    #[serde(default = "d_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: d_max_concurrent_runs(),
            default_timeout_secs: d_default_timeout_secs(),
            sync_wait_secs: d_sync_wait_secs(),
            subscriber_buffer: d_subscriber_buffer(),
            cancel_grace_ms: d_cancel_grace_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn clamped(&self) -> Self {
        Self {
            max_concurrent_runs: self.max_concurrent_runs.clamp(1, 256),
            default_timeout_secs: self.default_timeout_secs.max(1),
            sync_wait_secs: self.sync_wait_secs,
            subscriber_buffer: self.subscriber_buffer.clamp(8, 4096),
            cancel_grace_ms: self.cancel_grace_ms,
        }
    }
}

fn d_max_concurrent_runs() -> usize {
    8
}
fn d_default_timeout_secs() -> u64 {
    600
}
fn d_sync_wait_secs() -> u64 {
    60
}
fn d_subscriber_buffer() -> usize {
    128
}
fn d_cancel_grace_ms() -> u64 {
    2000
}
