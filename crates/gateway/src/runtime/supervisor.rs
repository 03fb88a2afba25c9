//! Execution supervisor: admission, the per-run state machine, deadlines and
//! cancellation.
//!
//! Every state change goes through the tenant's `RunRegistry` as a
//! compare-and-set, and the matching event is published from the registry's
//! commit hook. Subscribers therefore see states in journal order and never
//! see a state that a direct lookup could not confirm.
//!
//! Admission is FIFO: `create_run` appends to an unbounded queue and a single
//! dispatcher task takes a semaphore permit before spawning each run, so at
//! most `max_concurrent_runs` runs are `running` at once and the rest stay
//! `pending` in creation order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use af_domain::audit::AuditEntry;
use af_domain::config::{Config, ModelPricing, SupervisorConfig};
use af_domain::error::{Error, Result};
use af_domain::event::RunEvent;
use af_domain::run::{Run, RunError, RunFilter, RunState, Transition};
use af_domain::spec::ResolvedSpec;
use af_domain::template::TemplateKind;
use af_domain::usage::{UsageCounters, UsageRecord};
use af_providers::{AdapterRegistry, InvokeContext, Outcome};
use af_resolver::{ResolveRequest, Resolver};
use af_store::{Partition, TenantRouter};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;
use uuid::Uuid;

use super::broadcast::RunBroadcaster;
use super::cancel::CancelMap;
use super::retry::RetryPolicy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests and replies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to create a run against one instance.
#[derive(Debug, Clone, Default)]
pub struct CreateRun {
    pub instance_id: String,
    pub input: Value,
    pub variables: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
    /// Wait up to `sync_wait_secs` for a terminal state before returning.
    pub wait: bool,
    pub created_by: Option<String>,
}

/// Reply to a cancel request. Cancelling a run that already finished is not
/// an error; `cancelled` is false and `state` is the final state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancelAck {
    pub run_id: Uuid,
    pub cancelled: bool,
    pub state: RunState,
}

/// Result of attaching to a run: the state at connect time and, for a run
/// that is still live, the stream of subsequent events.
pub struct Attachment {
    pub snapshot: Run,
    pub live: Option<broadcast::Receiver<RunEvent>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecoveryReport {
    pub partitions: usize,
    /// Runs found `running` and marked failed.
    pub interrupted: usize,
    /// Runs found `pending` and put back on the admission queue.
    pub requeued: usize,
}

struct Admission {
    tenant_id: String,
    run_id: Uuid,
}

/// How the wait on an in-flight invocation ended.
enum Signal {
    Cancelled,
    TimedOut,
    Finished(std::result::Result<Outcome, JoinError>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Supervisor {
    router: Arc<TenantRouter>,
    resolver: Resolver,
    adapters: Arc<AdapterRegistry>,
    broadcaster: RunBroadcaster,
    cancels: CancelMap,
    retry: RetryPolicy,
    pricing: HashMap<String, ModelPricing>,
    cfg: SupervisorConfig,
    permits: Arc<Semaphore>,
    queue_tx: mpsc::UnboundedSender<Admission>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Admission>>>,
}

impl Supervisor {
    pub fn new(
        router: Arc<TenantRouter>,
        adapters: Arc<AdapterRegistry>,
        config: &Config,
    ) -> Result<Self> {
        let cfg = config.supervisor.clamped();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Self {
            router,
            resolver: Resolver::new()?,
            adapters,
            broadcaster: RunBroadcaster::new(cfg.subscriber_buffer),
            cancels: CancelMap::new(),
            retry: RetryPolicy::from_config(&config.store),
            pricing: config.pricing.clone(),
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_runs)),
            cfg,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    pub fn router(&self) -> &Arc<TenantRouter> {
        &self.router
    }

    pub fn broadcaster(&self) -> &RunBroadcaster {
        &self.broadcaster
    }

    /// Runs currently holding an execution slot.
    pub fn active_runs(&self) -> usize {
        self.cfg.max_concurrent_runs - self.permits.available_permits()
    }

    /// Start the admission loop. Only the first call has an effect.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.queue_rx.lock().take()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(Admission { tenant_id, run_id }) = rx.recv().await {
                let Ok(permit) = this.permits.clone().acquire_owned().await else {
                    break;
                };
                let worker = Arc::clone(&this);
                let span = tracing::info_span!("run", %run_id, tenant_id = %tenant_id);
                tokio::spawn(
                    async move {
                        match worker.execute(&tenant_id, run_id, permit).await {
                            Ok(_) | Err(Error::ConcurrencyConflict(_)) => {}
                            Err(e) => tracing::warn!(error = %e, "run did not execute"),
                        }
                    }
                    .instrument(span),
                );
            }
            tracing::debug!("admission queue closed");
        }))
    }

    fn enqueue(&self, tenant_id: &str, run_id: Uuid) {
        let admission = Admission {
            tenant_id: tenant_id.to_owned(),
            run_id,
        };
        if self.queue_tx.send(admission).is_err() {
            tracing::error!(%run_id, "admission queue closed; run stays pending");
        }
    }

    async fn partition(&self, tenant_id: &str) -> Result<Arc<Partition>> {
        self.retry
            .run("open partition", || self.router.partition(tenant_id))
            .await
    }

    fn publish_state(&self, run: &Run) {
        self.broadcaster.publish(RunEvent::state_of(run));
    }

    // ── create / read ──────────────────────────────────────────────

    /// Resolve the instance into a spec, persist a `pending` run and queue
    /// it. With `wait`, returns once the run is terminal or the sync wait
    /// elapses, whichever comes first.
    pub async fn create_run(&self, tenant_id: &str, req: CreateRun) -> Result<Run> {
        let partition = self.partition(tenant_id).await?;
        let instance = partition.instances.get(&req.instance_id)?;
        let templates = self
            .router
            .templates()
            .snapshot_for(TemplateKind::Agent, &instance.agent_id)?;
        let spec = self.resolver.resolve(
            &*templates,
            &ResolveRequest {
                tenant_id,
                instance: &instance,
                call_variables: &req.variables,
                default_timeout_secs: self.cfg.default_timeout_secs,
            },
        )?;

        let mut run = Run::new(spec, req.input, req.variables, req.created_by)?;
        run.metadata = req.metadata;
        let run_id = run.run_id;
        self.retry
            .run("insert run", || partition.runs.insert(run.clone()))
            .await?;
        tracing::info!(
            %run_id,
            tenant_id,
            instance_id = %run.instance_id,
            agent_id = %run.agent_id,
            "run created"
        );
        self.audit(
            &partition,
            AuditEntry::new(tenant_id, "run", run_id.to_string(), "create")
                .actor(run.created_by.clone())
                .detail(json!({
                    "instance_id": run.instance_id,
                    "agent_id": run.agent_id,
                    "spec_fingerprint": run.spec_fingerprint,
                }))
                .dedup(format!("{run_id}:create")),
        )
        .await;

        if !req.wait {
            self.enqueue(tenant_id, run_id);
            return Ok(run);
        }

        let mut rx = self.broadcaster.subscribe(&run_id);
        self.enqueue(tenant_id, run_id);
        let wait = Duration::from_secs(self.cfg.sync_wait_secs);
        let finished = tokio::time::timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.is_terminal() => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        })
        .await
        .is_ok();
        drop(rx);
        if !finished {
            self.broadcaster.release(&run_id);
        }

        partition
            .runs
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    pub async fn get_run(&self, tenant_id: &str, run_id: &Uuid) -> Result<Run> {
        self.partition(tenant_id)
            .await?
            .runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    /// Newest first, with the total number of matches.
    pub async fn list_runs(&self, tenant_id: &str, filter: &RunFilter) -> Result<(Vec<Run>, usize)> {
        Ok(self.partition(tenant_id).await?.runs.list(filter))
    }

    /// Subscribe to a run's live events. The receiver is taken before the
    /// snapshot is read, so nothing published after the snapshot is missed;
    /// an event may be seen both in the snapshot and on the stream.
    pub async fn attach(&self, tenant_id: &str, run_id: &Uuid) -> Result<Attachment> {
        let partition = self.partition(tenant_id).await?;
        if partition.runs.get(run_id).is_none() {
            return Err(Error::RunNotFound(run_id.to_string()));
        }
        let rx = self.broadcaster.subscribe(run_id);
        let snapshot = partition
            .runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if snapshot.state.is_terminal() {
            drop(rx);
            self.broadcaster.release(run_id);
            return Ok(Attachment {
                snapshot,
                live: None,
            });
        }
        Ok(Attachment {
            snapshot,
            live: Some(rx),
        })
    }

    // ── cancel ─────────────────────────────────────────────────────

    /// Record `cancelled` and signal the in-flight invocation, if any. The
    /// recorded state does not wait for the adapter to stop.
    pub async fn cancel_run(
        &self,
        tenant_id: &str,
        run_id: &Uuid,
        actor: Option<String>,
    ) -> Result<CancelAck> {
        let partition = self.partition(tenant_id).await?;
        let current = partition
            .runs
            .get(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if current.state.is_terminal() {
            return Ok(CancelAck {
                run_id: *run_id,
                cancelled: false,
                state: current.state,
            });
        }

        let written = self
            .retry
            .run("cancel run", || {
                partition.runs.transition_then(
                    run_id,
                    Transition::to(RunState::Cancelled),
                    |r| self.publish_state(r),
                )
            })
            .await;
        let run = match written {
            Ok(run) => run,
            Err(Error::InvalidTransition { .. }) => {
                let state = partition.runs.get(run_id).map_or(current.state, |r| r.state);
                return Ok(CancelAck {
                    run_id: *run_id,
                    cancelled: false,
                    state,
                });
            }
            Err(e) => return Err(e),
        };

        let signalled = self.cancels.cancel(run_id);
        tracing::info!(%run_id, tenant_id, from = %current.state, signalled, "run cancelled");
        self.audit(
            &partition,
            AuditEntry::new(tenant_id, "run", run_id.to_string(), "cancel")
                .actor(actor)
                .detail(json!({ "from": current.state, "signalled": signalled }))
                .dedup(format!("{run_id}:cancelled")),
        )
        .await;

        Ok(CancelAck {
            run_id: *run_id,
            cancelled: true,
            state: run.state,
        })
    }

    // ── execution ──────────────────────────────────────────────────

    /// Execute a pending run in the caller's task, bypassing the queue but
    /// not the concurrency ceiling. A run that is no longer pending is not
    /// executed; the caller gets `ConcurrencyConflict`.
    pub async fn start(&self, tenant_id: &str, run_id: Uuid) -> Result<Run> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("supervisor is shutting down".into()))?;
        self.execute(tenant_id, run_id, permit).await
    }

    async fn execute(
        &self,
        tenant_id: &str,
        run_id: Uuid,
        permit: OwnedSemaphorePermit,
    ) -> Result<Run> {
        let partition = self.partition(tenant_id).await?;

        // The token is registered inside the claim's commit so a cancel can
        // never land between `running` being recorded and the token existing.
        let mut token = None;
        let claimed = self
            .retry
            .run("claim run", || {
                partition.runs.claim_then(&run_id, |r| {
                    token = Some(self.cancels.register(run_id));
                    self.publish_state(r);
                })
            })
            .await;
        let run = match claimed {
            Ok(run) => run,
            Err(Error::ConcurrencyConflict(id)) => {
                tracing::debug!(%run_id, "run already claimed or cancelled; skipping");
                return Err(Error::ConcurrencyConflict(id));
            }
            Err(e) if e.is_transient() => {
                tracing::error!(%run_id, error = %e, "claim write failed after retries");
                let t = Transition::to(RunState::Failed).with_error(RunError::new(
                    "storage_error",
                    format!("could not record running: {e}"),
                ));
                let done = partition
                    .runs
                    .settle_unpersisted(&run_id, t, |r| self.publish_state(r));
                drop(permit);
                return self.settle(&partition, done).await;
            }
            Err(e) => return Err(e),
        };
        let Some(token) = token else {
            return Err(Error::Other(format!("run {run_id} claimed without a cancel token")));
        };
        // The deadline counts from the claim, not from the audit write below.
        let timeout_secs = run.spec.timeout_secs.max(1);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        self.audit(
            &partition,
            AuditEntry::new(tenant_id, "run", run_id.to_string(), "start")
                .detail(json!({ "provider": run.spec.model.provider }))
                .dedup(format!("{run_id}:running")),
        )
        .await;

        let Some(adapter) = self.adapters.get(&run.spec.model.provider) else {
            let t = Transition::to(RunState::Failed).with_error(RunError::new(
                "adapter_not_found",
                format!("no adapter registered for provider '{}'", run.spec.model.provider),
            ));
            let done = self.finish(&partition, &run_id, t).await;
            drop(permit);
            return self.settle(&partition, done).await;
        };

        let (ptx, mut prx) = mpsc::unbounded_channel();
        let ctx = InvokeContext::new(run_id, token.clone()).with_progress(ptx);
        let spec = run.spec.clone();
        let input = run.input.clone();
        tracing::debug!(adapter = %adapter.adapter_id(), timeout_secs, "invoking adapter");
        let mut handle = tokio::spawn(
            async move { adapter.invoke(&spec, &input, &ctx).await }.in_current_span(),
        );

        let signal = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Signal::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break Signal::TimedOut,
                joined = &mut handle => break Signal::Finished(joined),
                Some(partial) = prx.recv() => {
                    self.broadcaster.publish(RunEvent::Progress { run_id, partial });
                }
            }
        };

        let done = match signal {
            Signal::Cancelled => {
                self.reap(run_id, handle);
                partition
                    .runs
                    .get(&run_id)
                    .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
            }
            Signal::TimedOut => {
                token.cancel();
                self.reap(run_id, handle);
                tracing::warn!(%run_id, timeout_secs, "run deadline elapsed");
                let t = Transition::to(RunState::Timeout).with_error(RunError::new(
                    "timeout",
                    format!("run exceeded its {timeout_secs}s deadline"),
                ));
                self.finish(&partition, &run_id, t).await
            }
            Signal::Finished(joined) => {
                while let Ok(partial) = prx.try_recv() {
                    self.broadcaster.publish(RunEvent::Progress { run_id, partial });
                }
                let t = self.outcome_transition(&run.spec, joined);
                self.finish(&partition, &run_id, t).await
            }
        };
        drop(permit);
        self.settle(&partition, done).await
    }

    fn outcome_transition(
        &self,
        spec: &ResolvedSpec,
        joined: std::result::Result<Outcome, JoinError>,
    ) -> Transition {
        match joined {
            Ok(Outcome::Success {
                result,
                usage,
                model,
            }) => {
                let model = model.unwrap_or_else(|| spec.model.model_id.clone());
                Transition {
                    to: RunState::Completed,
                    result: Some(result),
                    error: None,
                    usage: Some(self.priced(spec, &model, usage)),
                    model_used: Some(model),
                }
            }
            Ok(Outcome::Failure { kind, detail }) => {
                Transition::to(RunState::Failed).with_error(RunError::new(kind, detail))
            }
            Err(e) => {
                let detail = if e.is_panic() {
                    "adapter panicked".to_owned()
                } else {
                    e.to_string()
                };
                tracing::error!(error = %e, "adapter task did not return an outcome");
                Transition::to(RunState::Failed).with_error(RunError::new("adapter_panic", detail))
            }
        }
    }

    /// Fill in cost when the adapter did not report one: configured pricing
    /// for the model first, then the spec's flat per-unit rate.
    fn priced(&self, spec: &ResolvedSpec, model: &str, mut usage: UsageCounters) -> UsageCounters {
        if usage.cost > 0.0 {
            return usage;
        }
        if let Some(p) = self
            .pricing
            .get(model)
            .or_else(|| self.pricing.get(&spec.model.model_id))
        {
            usage.cost = p.estimate_cost(usage.input_units, usage.output_units);
        } else if let Some(rate) = spec.model.cost_per_token {
            usage.cost = rate * usage.total_units() as f64;
        }
        usage
    }

    /// Give a signalled adapter `cancel_grace_ms` to return, then abort it.
    fn reap(&self, run_id: Uuid, handle: JoinHandle<Outcome>) {
        let grace = Duration::from_millis(self.cfg.cancel_grace_ms);
        let abort = handle.abort_handle();
        tokio::spawn(async move {
            if tokio::time::timeout(grace, handle).await.is_err() {
                abort.abort();
                tracing::warn!(%run_id, grace_ms = grace.as_millis() as u64, "adapter ignored cancellation; aborted");
            }
        });
    }

    /// Persist a terminal transition. Losing to a concurrent cancel is not an
    /// error: the run already holds its final state. When storage keeps
    /// failing the run is settled as `failed` in memory so it never looks
    /// live to callers.
    async fn finish(&self, partition: &Partition, run_id: &Uuid, t: Transition) -> Result<Run> {
        let to = t.to;
        let written = self
            .retry
            .run("terminal write", || {
                partition
                    .runs
                    .transition_then(run_id, t.clone(), |r| self.publish_state(r))
            })
            .await;
        match written {
            Ok(run) => Ok(run),
            Err(Error::InvalidTransition { from, .. }) => {
                tracing::debug!(%run_id, %from, wanted = %to, "run already terminal");
                partition
                    .runs
                    .get(run_id)
                    .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
            }
            Err(e) if e.is_transient() => {
                tracing::error!(%run_id, wanted = %to, error = %e, "terminal write failed after retries");
                let t = Transition::to(RunState::Failed).with_error(RunError::new(
                    "storage_error",
                    format!("could not record {to}: {e}"),
                ));
                partition
                    .runs
                    .settle_unpersisted(run_id, t, |r| self.publish_state(r))
            }
            Err(e) => Err(e),
        }
    }

    /// Post-terminal bookkeeping: usage, audit and the cancel token.
    async fn settle(&self, partition: &Partition, done: Result<Run>) -> Result<Run> {
        let run = done?;
        self.cancels.remove(&run.run_id);
        tracing::info!(
            run_id = %run.run_id,
            state = %run.state,
            duration_ms = run.duration_ms.unwrap_or(0),
            error_kind = run.error.as_ref().map(|e| e.kind.as_str()).unwrap_or(""),
            "run finished"
        );

        if let Some(usage) = run.usage {
            let record = UsageRecord {
                dedup_key: UsageRecord::key_for(&run.run_id, run.state.as_str()),
                tenant_id: run.tenant_id.clone(),
                run_id: run.run_id,
                agent_id: run.agent_id.clone(),
                provider: run.spec.model.provider.clone(),
                model_id: run
                    .model_used
                    .clone()
                    .unwrap_or_else(|| run.spec.model.model_id.clone()),
                counters: usage,
                usage_type: "execution".into(),
                recorded_at: Utc::now(),
            };
            if let Err(e) = self
                .retry
                .run("record usage", || partition.usage.record(record.clone()))
                .await
            {
                tracing::warn!(run_id = %run.run_id, error = %e, "failed to record usage");
            }
        }

        let action = match run.state {
            RunState::Completed => "complete",
            RunState::Failed => "fail",
            RunState::Timeout => "timeout",
            // Recorded by `cancel_run`, with its actor.
            _ => return Ok(run),
        };
        self.audit(
            partition,
            AuditEntry::new(&run.tenant_id, "run", run.run_id.to_string(), action)
                .detail(json!({
                    "error": run.error,
                    "usage": run.usage,
                    "duration_ms": run.duration_ms,
                }))
                .dedup(format!("{}:{}", run.run_id, run.state)),
        )
        .await;
        Ok(run)
    }

    async fn audit(&self, partition: &Partition, entry: AuditEntry) {
        let action = entry.action.clone();
        if let Err(e) = self
            .retry
            .run("record audit", || partition.audit.record(entry.clone()))
            .await
        {
            tracing::warn!(action = %action, error = %e, "failed to record audit entry");
        }
    }

    // ── recovery ───────────────────────────────────────────────────

    /// Settle what a previous process left behind: `running` runs cannot be
    /// resumed and are failed as `interrupted`; `pending` runs are queued
    /// again, oldest first across all tenants.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let partitions = self.router.open_all()?;
        let mut report = RecoveryReport {
            partitions: partitions.len(),
            ..Default::default()
        };
        let mut pending = Vec::new();

        for partition in &partitions {
            for run in partition.runs.in_state(RunState::Running) {
                let t = Transition::to(RunState::Failed).with_error(RunError::new(
                    "interrupted",
                    "the process stopped while the run was executing",
                ));
                match partition.runs.transition(&run.run_id, t) {
                    Ok(run) => {
                        report.interrupted += 1;
                        self.audit(
                            partition,
                            AuditEntry::new(partition.tenant_id(), "run", run.run_id.to_string(), "fail")
                                .detail(json!({ "error": run.error }))
                                .dedup(format!("{}:failed", run.run_id)),
                        )
                        .await;
                    }
                    Err(e) => {
                        tracing::warn!(run_id = %run.run_id, error = %e, "could not settle interrupted run");
                    }
                }
            }
            for run in partition.runs.in_state(RunState::Pending) {
                pending.push((run.created_at, partition.tenant_id().to_owned(), run.run_id));
            }
        }

        pending.sort();
        report.requeued = pending.len();
        for (_, tenant_id, run_id) in pending {
            self.enqueue(&tenant_id, run_id);
        }
        tracing::info!(
            partitions = report.partitions,
            interrupted = report.interrupted,
            requeued = report.requeued,
            "recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_domain::config::{ProviderConfig, ProviderKind, StoreConfig};
    use af_domain::instance::{Instance, NewInstance};
    use af_domain::template::TemplateEntry;
    use af_domain::tenant::NewTenant;
    use af_providers::{Script, ScriptedAdapter};

    struct Fixture {
        _dir: tempfile::TempDir,
        supervisor: Arc<Supervisor>,
        adapter: Arc<ScriptedAdapter>,
    }

    fn fixture(adapter: ScriptedAdapter) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            store: StoreConfig {
                state_path: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let router = Arc::new(TenantRouter::open(&config.store).unwrap());
        router
            .create_tenant(NewTenant {
                tenant_id: "acme".into(),
                display_name: "Acme".into(),
                ..Default::default()
            })
            .unwrap();
        let templates = router.templates();
        templates
            .upsert(
                TemplateEntry::from_json(
                    TemplateKind::Model,
                    json!({"config_id": "echo", "provider": "dev", "model_id": "echo-1"}),
                )
                .unwrap(),
            )
            .unwrap();
        templates
            .upsert(
                TemplateEntry::from_json(
                    TemplateKind::Agent,
                    json!({"agent_id": "analyst", "name": "Analyst", "default_model": "echo"}),
                )
                .unwrap(),
            )
            .unwrap();
        let partition = router.partition("acme").unwrap();
        partition
            .instances
            .create(
                Instance::create(
                    "acme",
                    NewInstance {
                        instance_id: Some("inst-1".into()),
                        agent_id: "analyst".into(),
                        ..Default::default()
                    },
                    "Analyst",
                )
                .unwrap(),
            )
            .unwrap();

        let adapter = Arc::new(adapter);
        let mut adapters = AdapterRegistry::from_config(&[ProviderConfig {
            id: "unused".into(),
            kind: ProviderKind::Scripted,
            base_url: None,
            api_key_env: None,
            default_model: None,
            command: None,
            args: Vec::new(),
            env: Default::default(),
        }]);
        adapters.register(adapter.clone());
        let supervisor = Arc::new(Supervisor::new(router, Arc::new(adapters), &config).unwrap());
        Fixture {
            _dir: dir,
            supervisor,
            adapter,
        }
    }

    fn request() -> CreateRun {
        CreateRun {
            instance_id: "inst-1".into(),
            input: Value::from("hello"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_without_dispatcher_stays_pending() {
        let f = fixture(ScriptedAdapter::new("dev", Script::Echo));
        let run = f.supervisor.create_run("acme", request()).await.unwrap();
        assert_eq!(run.state, RunState::Pending);
        assert_eq!(run.spec.model.provider, "dev");
        assert_eq!(f.adapter.calls(), 0);
    }

    #[tokio::test]
    async fn start_runs_to_completion_and_records_usage() {
        let f = fixture(ScriptedAdapter::new("dev", Script::Echo));
        let run = f.supervisor.create_run("acme", request()).await.unwrap();
        let done = f.supervisor.start("acme", run.run_id).await.unwrap();
        assert_eq!(done.state, RunState::Completed);
        assert_eq!(done.result.as_ref().unwrap()["content"], "hello");
        assert_eq!(done.model_used.as_deref(), Some("echo-1"));

        let partition = f.supervisor.router().partition("acme").unwrap();
        assert_eq!(partition.usage.for_run(&run.run_id).len(), 1);
        assert_eq!(f.supervisor.active_runs(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_fails_run() {
        let f = fixture(ScriptedAdapter::new("other", Script::Echo));
        let run = f.supervisor.create_run("acme", request()).await.unwrap();
        let done = f.supervisor.start("acme", run.run_id).await.unwrap();
        assert_eq!(done.state, RunState::Failed);
        assert_eq!(done.error.unwrap().kind, "adapter_not_found");
    }

    #[tokio::test]
    async fn cancel_terminal_run_is_noop() {
        let f = fixture(ScriptedAdapter::new("dev", Script::Echo));
        let run = f.supervisor.create_run("acme", request()).await.unwrap();
        f.supervisor.start("acme", run.run_id).await.unwrap();
        let ack = f
            .supervisor
            .cancel_run("acme", &run.run_id, None)
            .await
            .unwrap();
        assert!(!ack.cancelled);
        assert_eq!(ack.state, RunState::Completed);
    }

    #[test]
    fn pricing_prefers_reported_cost() {
        let f = fixture(ScriptedAdapter::new("dev", Script::Echo));
        let mut spec: ResolvedSpec = serde_json::from_value(json!({
            "tenant_id": "acme", "instance_id": "i", "agent_id": "a", "name": "A",
            "system_prompt": "", "variables": {},
            "model": {"provider": "dev", "model_id": "m", "temperature": 0.0, "max_tokens": 1},
            "timeout_secs": 1
        }))
        .unwrap();
        let usage = UsageCounters {
            input_units: 10,
            output_units: 10,
            cost: 0.0,
        };
        assert_eq!(f.supervisor.priced(&spec, "m", usage).cost, 0.0);

        spec.model.cost_per_token = Some(0.5);
        assert!((f.supervisor.priced(&spec, "m", usage).cost - 10.0).abs() < 1e-9);

        let reported = UsageCounters { cost: 1.25, ..usage };
        assert!((f.supervisor.priced(&spec, "m", reported).cost - 1.25).abs() < 1e-9);
    }
}
