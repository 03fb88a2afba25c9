//! Per-run fan-out of live updates.
//!
//! One `tokio::sync::broadcast` channel per run with a bounded buffer. Every
//! receiver keeps its own cursor, so a slow subscriber only lags itself: once
//! it falls `capacity` events behind, its oldest events are dropped and its
//! next `recv` reports `Lagged(n)`. Publishing never waits.
//!
//! Channels are created on first subscribe and removed as soon as a terminal
//! state is published; receivers drain what is buffered and then see
//! `Closed`.

use std::collections::HashMap;

use af_domain::event::RunEvent;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

pub struct RunBroadcaster {
    channels: RwLock<HashMap<Uuid, broadcast::Sender<RunEvent>>>,
    capacity: usize,
}

impl RunBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Get or create the run's channel and subscribe to it.
    pub fn subscribe(&self, run_id: &Uuid) -> broadcast::Receiver<RunEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(*run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver `event` to every current subscriber of its run. A terminal
    /// event also closes the channel.
    pub fn publish(&self, event: RunEvent) {
        let run_id = event.run_id();
        if event.is_terminal() {
            if let Some(tx) = self.channels.write().remove(&run_id) {
                let _ = tx.send(event);
            }
            return;
        }
        if let Some(tx) = self.channels.read().get(&run_id) {
            let _ = tx.send(event);
        }
    }

    /// Remove the run's channel if nobody is listening. Used when an attach
    /// finds the run already terminal.
    pub fn release(&self, run_id: &Uuid) {
        let mut channels = self.channels.write();
        if channels
            .get(run_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(run_id);
        }
    }

    pub fn subscriber_count(&self, run_id: &Uuid) -> usize {
        self.channels
            .read()
            .get(run_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Number of runs with an open channel.
    pub fn active_channels(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_domain::run::{RunError, RunState};
    use chrono::Utc;
    use tokio::sync::broadcast::error::RecvError;

    fn state(run_id: Uuid, state: RunState) -> RunEvent {
        RunEvent::State {
            run_id,
            state,
            at: Utc::now(),
            result: None,
            error: None,
            usage: None,
        }
    }

    fn progress(run_id: Uuid, n: u64) -> RunEvent {
        RunEvent::Progress {
            run_id,
            partial: serde_json::json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn every_subscriber_gets_its_own_copy() {
        let b = RunBroadcaster::new(16);
        let id = Uuid::new_v4();
        let mut a = b.subscribe(&id);
        let mut c = b.subscribe(&id);
        assert_eq!(b.subscriber_count(&id), 2);

        b.publish(state(id, RunState::Running));
        let first = a.recv().await.unwrap();
        assert_eq!(first, c.recv().await.unwrap());
        assert_eq!(first.run_id(), id);
    }

    #[tokio::test]
    async fn terminal_event_closes_channel_after_delivery() {
        let b = RunBroadcaster::new(16);
        let id = Uuid::new_v4();
        let mut rx = b.subscribe(&id);

        let failed = RunEvent::State {
            run_id: id,
            state: RunState::Failed,
            at: Utc::now(),
            result: None,
            error: Some(RunError::new("rate_limited", "429")),
            usage: None,
        };
        b.publish(failed);
        assert_eq!(b.active_channels(), 0);

        match rx.recv().await.unwrap() {
            RunEvent::State { state, error, .. } => {
                assert_eq!(state, RunState::Failed);
                assert_eq!(error.unwrap().kind, "rate_limited");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_others() {
        let b = RunBroadcaster::new(4);
        let id = Uuid::new_v4();
        let mut slow = b.subscribe(&id);
        let mut fast = b.subscribe(&id);

        for n in 0..10 {
            b.publish(progress(id, n));
            assert!(matches!(fast.recv().await.unwrap(), RunEvent::Progress { .. }));
        }
        match slow.recv().await {
            Err(RecvError::Lagged(missed)) => assert_eq!(missed, 6),
            other => panic!("expected lag, got {other:?}"),
        }
        // Oldest retained event comes next.
        match slow.recv().await.unwrap() {
            RunEvent::Progress { partial, .. } => assert_eq!(partial["n"], 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let b = RunBroadcaster::new(4);
        b.publish(progress(Uuid::new_v4(), 1));
        assert_eq!(b.active_channels(), 0);
    }

    #[test]
    fn release_only_removes_idle_channels() {
        let b = RunBroadcaster::new(4);
        let id = Uuid::new_v4();
        let rx = b.subscribe(&id);
        b.release(&id);
        assert_eq!(b.active_channels(), 1);
        drop(rx);
        b.release(&id);
        assert_eq!(b.active_channels(), 0);
    }
}
