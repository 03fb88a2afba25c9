//! Per-run cancellation tokens.
//!
//! Each executing run gets a [`CancellationToken`]. Cancelling it signals the
//! supervisor's select loop and the adapter; it never rewrites run state on
//! its own (the supervisor records `cancelled` before firing the token).

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a run, replacing any previous one.
    pub fn register(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(run_id, token.clone());
        token
    }

    /// Fire the run's token. Returns true if one was registered.
    pub fn cancel(&self, run_id: &Uuid) -> bool {
        match self.tokens.lock().get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the token once the run has reached a terminal state.
    pub fn remove(&self, run_id: &Uuid) {
        self.tokens.lock().remove(run_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
