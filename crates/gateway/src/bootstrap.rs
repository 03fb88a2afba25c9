//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use af_domain::config::{Config, ConfigSeverity};
use af_providers::AdapterRegistry;
use af_store::TenantRouter;

use crate::runtime::Supervisor;
use crate::state::AppState;

/// Validate config, open storage, settle runs left over from a previous
/// process and return a fully-wired [`AppState`]. The admission loop is not
/// started yet; see [`spawn_background_tasks`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if Config::has_errors(&issues) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Tenant router + master registries ────────────────────────────
    let router = Arc::new(
        TenantRouter::open(&config.store)
            .with_context(|| format!("opening state at {}", config.store.state_path.display()))?,
    );
    tracing::info!(
        tenants = router.list_tenants().len(),
        templates = router.templates().snapshot().len(),
        "tenant router ready"
    );

    // ── Invocation adapters ──────────────────────────────────────────
    let adapters = Arc::new(AdapterRegistry::from_config(&config.providers));
    tracing::info!(adapters = adapters.len(), "adapter registry ready");

    // ── Supervisor ───────────────────────────────────────────────────
    let supervisor = Arc::new(
        Supervisor::new(router.clone(), adapters.clone(), &config)
            .context("initializing supervisor")?,
    );
    tracing::info!(
        max_concurrent_runs = supervisor.config().max_concurrent_runs,
        default_timeout_secs = supervisor.config().default_timeout_secs,
        "supervisor ready"
    );

    // ── Crash recovery ───────────────────────────────────────────────
    let report = supervisor
        .recover()
        .await
        .context("recovering runs from previous process")?;
    if report.interrupted > 0 {
        tracing::warn!(interrupted = report.interrupted, "runs interrupted by restart marked failed");
    }

    Ok(AppState {
        config,
        router,
        adapters,
        supervisor,
        started_at: Instant::now(),
    })
}

/// Start the admission loop that executes queued runs.
pub fn spawn_background_tasks(state: &AppState) {
    if state.supervisor.spawn_dispatcher().is_some() {
        tracing::info!("run dispatcher started");
    }
}
