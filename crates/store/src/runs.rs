//! Run registry: the single source of truth for run state.
//!
//! Every state change is a compare-and-set under the registry's write lock:
//! the transition is checked against the state machine, appended to the
//! journal, and only then applied in memory. Two callers racing to claim
//! the same pending run therefore serialize here, and exactly one wins.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use af_domain::error::{Error, Result};
use af_domain::run::{Run, RunFilter, RunState, Transition};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::journal::Journal;

pub struct RunRegistry {
    inner: RwLock<Inner>,
    journal: Journal,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, Run>,
    /// Creation order, oldest first.
    order: Vec<Uuid>,
}

impl Inner {
    fn put(&mut self, run: Run) {
        if !self.runs.contains_key(&run.run_id) {
            self.order.push(run.run_id);
        }
        self.runs.insert(run.run_id, run);
    }
}

impl RunRegistry {
    /// Open the registry in `dir`, replaying `runs.jsonl`. Later lines for
    /// the same run replace earlier ones; the file is compacted when it
    /// holds superseded lines.
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Journal::new(dir.join("runs.jsonl"));
        let lines: Vec<Run> = journal.load()?;
        let total = lines.len();

        let mut inner = Inner::default();
        for run in lines {
            inner.put(run);
        }
        if total > inner.order.len() {
            tracing::info!(
                kept = inner.order.len(),
                superseded = total - inner.order.len(),
                "compacting runs journal"
            );
            journal.rewrite(inner.order.iter().filter_map(|id| inner.runs.get(id)))?;
        }

        Ok(Self {
            inner: RwLock::new(inner),
            journal,
        })
    }

    /// Register a new run. It must not already exist.
    pub fn insert(&self, run: Run) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.runs.contains_key(&run.run_id) {
            return Err(Error::Validation(format!("run {} already exists", run.run_id)));
        }
        self.journal.append(&run)?;
        inner.put(run);
        Ok(())
    }

    pub fn get(&self, run_id: &Uuid) -> Option<Run> {
        self.inner.read().runs.get(run_id).cloned()
    }

    /// Atomically move `pending → running`. Losing the race (the run is no
    /// longer pending) yields `ConcurrencyConflict`.
    pub fn claim(&self, run_id: &Uuid) -> Result<Run> {
        self.compare_and_set(run_id, Transition::to(RunState::Running), true, |_| {})
    }

    /// Apply any other legal transition. Moving out of a state the machine
    /// does not allow (including any terminal state) is `InvalidTransition`.
    pub fn transition(&self, run_id: &Uuid, t: Transition) -> Result<Run> {
        self.compare_and_set(run_id, t, false, |_| {})
    }

    /// [`Self::claim`], calling `on_commit` with the persisted run before the
    /// write lock is released.
    pub fn claim_then(&self, run_id: &Uuid, on_commit: impl FnOnce(&Run)) -> Result<Run> {
        self.compare_and_set(run_id, Transition::to(RunState::Running), true, on_commit)
    }

    /// [`Self::transition`] with a commit hook. Hooks run in commit order,
    /// so events published from them reach subscribers in the same order
    /// the journal recorded the states. `on_commit` must not block.
    pub fn transition_then(
        &self,
        run_id: &Uuid,
        t: Transition,
        on_commit: impl FnOnce(&Run),
    ) -> Result<Run> {
        self.compare_and_set(run_id, t, false, on_commit)
    }

    fn compare_and_set(
        &self,
        run_id: &Uuid,
        t: Transition,
        claim: bool,
        on_commit: impl FnOnce(&Run),
    ) -> Result<Run> {
        let mut inner = self.inner.write();
        let current = inner
            .runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        if claim && current.state != RunState::Pending {
            return Err(Error::ConcurrencyConflict(run_id.to_string()));
        }
        if !current.state.can_transition_to(t.to) {
            return Err(Error::InvalidTransition {
                run_id: run_id.to_string(),
                from: current.state.to_string(),
                to: t.to.to_string(),
            });
        }

        let mut next = current.clone();
        next.apply(t);
        self.journal.append(&next)?;
        inner.runs.insert(*run_id, next.clone());
        on_commit(&next);
        Ok(next)
    }

    /// Last resort when the journal keeps rejecting a claim or a terminal
    /// write: apply the transition in memory only so the run stops looking
    /// live. Accepts the extra `pending -> failed` edge
    /// ([`RunState::can_settle_to`]). The journal still holds the previous
    /// state; recovery on the next start settles it.
    pub fn settle_unpersisted(
        &self,
        run_id: &Uuid,
        t: Transition,
        on_commit: impl FnOnce(&Run),
    ) -> Result<Run> {
        let mut inner = self.inner.write();
        let current = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if !current.state.can_settle_to(t.to) {
            return Err(Error::InvalidTransition {
                run_id: run_id.to_string(),
                from: current.state.to_string(),
                to: t.to.to_string(),
            });
        }
        current.apply(t);
        tracing::error!(%run_id, state = %current.state, "run state held in memory only");
        let settled = current.clone();
        on_commit(&settled);
        Ok(settled)
    }

    /// Newest first, with total match count.
    pub fn list(&self, filter: &RunFilter) -> (Vec<Run>, usize) {
        let inner = self.inner.read();
        let matches = |r: &&Run| -> bool {
            filter.state.map_or(true, |s| r.state == s)
                && filter
                    .instance_id
                    .as_deref()
                    .map_or(true, |id| r.instance_id == id)
                && filter
                    .agent_id
                    .as_deref()
                    .map_or(true, |id| r.agent_id == id)
        };
        let newest_first = || inner.order.iter().rev().filter_map(|id| inner.runs.get(id));

        let total = newest_first().filter(matches).count();
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        let page = newest_first()
            .filter(matches)
            .skip(filter.offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Runs currently in `state`, oldest first.
    pub fn in_state(&self, state: RunState) -> Vec<Run> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .filter(|r| r.state == state)
            .cloned()
            .collect()
    }

    /// Count runs by state (for the dashboard).
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let inner = self.inner.read();
        let mut counts = BTreeMap::new();
        for run in inner.runs.values() {
            *counts.entry(run.state.to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_domain::run::RunError;
    use af_domain::spec::{ResolvedModel, ResolvedSpec};
    use serde_json::Value;
    use std::sync::Arc;

    fn spec(instance: &str) -> ResolvedSpec {
        ResolvedSpec {
            tenant_id: "acme".into(),
            instance_id: instance.into(),
            agent_id: "analyst".into(),
            name: "Analyst".into(),
            system_prompt: String::new(),
            variables: Default::default(),
            model: ResolvedModel {
                provider: "scripted".into(),
                model_id: "echo-1".into(),
                temperature: 0.7,
                max_tokens: 100,
                top_p: None,
                cost_per_token: None,
            },
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            builtin_tools: Vec::new(),
            timeout_secs: 30,
            custom_settings: Default::default(),
        }
    }

    fn new_run(instance: &str) -> Run {
        Run::new(spec(instance), Value::Null, Default::default(), None).unwrap()
    }

    #[test]
    fn claim_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();

        assert_eq!(reg.claim(&id).unwrap().state, RunState::Running);
        assert!(matches!(reg.claim(&id), Err(Error::ConcurrencyConflict(_))));
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(RunRegistry::open(dir.path()).unwrap());
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.claim(&id).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn terminal_state_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();
        reg.claim(&id).unwrap();
        reg.transition(
            &id,
            Transition::to(RunState::Failed).with_error(RunError::new("rate_limited", "x")),
        )
        .unwrap();

        let err = reg
            .transition(&id, Transition::to(RunState::Cancelled))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let stored = reg.get(&id).unwrap();
        assert_eq!(stored.state, RunState::Failed);
        assert_eq!(stored.error.unwrap().kind, "rate_limited");
    }

    #[test]
    fn pending_can_be_cancelled_directly() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();
        let run = reg
            .transition(&id, Transition::to(RunState::Cancelled))
            .unwrap();
        assert!(run.started_at.is_none());
        assert!(matches!(reg.claim(&id), Err(Error::ConcurrencyConflict(_))));
    }

    #[test]
    fn commit_hook_sees_persisted_run_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();

        let mut seen = Vec::new();
        reg.claim_then(&id, |r| seen.push(r.state)).unwrap();
        reg.transition_then(&id, Transition::to(RunState::Completed), |r| seen.push(r.state))
            .unwrap();
        let late = reg.transition_then(&id, Transition::to(RunState::Cancelled), |r| {
            seen.push(r.state)
        });
        assert!(late.is_err());
        assert_eq!(seen, vec![RunState::Running, RunState::Completed]);
    }

    #[test]
    fn reload_keeps_latest_state_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let reg = RunRegistry::open(dir.path()).unwrap();
            let run = new_run("i1");
            let id = run.run_id;
            reg.insert(run).unwrap();
            reg.claim(&id).unwrap();
            reg.transition(&id, Transition::to(RunState::Completed))
                .unwrap();
            id
        };
        let reg = RunRegistry::open(dir.path()).unwrap();
        assert_eq!(reg.get(&id).unwrap().state, RunState::Completed);
        assert_eq!(reg.len(), 1);
        let lines = std::fs::read_to_string(dir.path().join("runs.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 1);
    }

    #[test]
    fn failed_append_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();

        let path = dir.path().join("runs.jsonl");
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = reg.claim(&id).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(reg.get(&id).unwrap().state, RunState::Pending);
    }

    #[test]
    fn settle_unpersisted_applies_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let reg = RunRegistry::open(dir.path()).unwrap();
            let run = new_run("i1");
            let id = run.run_id;
            reg.insert(run).unwrap();
            reg.claim(&id).unwrap();

            let mut published = None;
            let run = reg
                .settle_unpersisted(
                    &id,
                    Transition::to(RunState::Failed)
                        .with_error(RunError::new("storage_error", "disk full")),
                    |r| published = Some(r.state),
                )
                .unwrap();
            assert_eq!(run.state, RunState::Failed);
            assert_eq!(published, Some(RunState::Failed));
            assert_eq!(reg.get(&id).unwrap().state, RunState::Failed);
            id
        };
        let reg = RunRegistry::open(dir.path()).unwrap();
        assert_eq!(reg.get(&id).unwrap().state, RunState::Running);
    }

    #[test]
    fn pending_run_can_be_settled_failed() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let run = new_run("i1");
        let id = run.run_id;
        reg.insert(run).unwrap();

        let fail = || {
            Transition::to(RunState::Failed).with_error(RunError::new("storage_error", "disk full"))
        };
        assert!(matches!(
            reg.transition(&id, fail()),
            Err(Error::InvalidTransition { .. })
        ));
        let run = reg.settle_unpersisted(&id, fail(), |_| {}).unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[test]
    fn list_filters_and_paginates_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let reg = RunRegistry::open(dir.path()).unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let run = new_run(if i % 2 == 0 { "even" } else { "odd" });
            ids.push(run.run_id);
            reg.insert(run).unwrap();
        }
        reg.claim(&ids[4]).unwrap();

        let (page, total) = reg.list(&RunFilter {
            instance_id: Some("even".into()),
            limit: 2,
            ..Default::default()
        });
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].run_id, ids[4]);

        let (running, _) = reg.list(&RunFilter {
            state: Some(RunState::Running),
            ..Default::default()
        });
        assert_eq!(running.len(), 1);

        let pending = reg.in_state(RunState::Pending);
        assert_eq!(pending.first().unwrap().run_id, ids[0]);
        assert_eq!(reg.status_counts()["pending"], 4);
    }
}
