#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use af_domain::config::{Config, ProviderConfig, ProviderKind, StoreConfig, SupervisorConfig};
use af_domain::instance::{Instance, NewInstance};
use af_domain::run::Run;
use af_domain::template::{TemplateEntry, TemplateKind};
use af_domain::tenant::NewTenant;
use af_gateway::runtime::{CreateRun, Supervisor};
use af_providers::{AdapterRegistry, ScriptedAdapter};
use af_store::TenantRouter;
use serde_json::{json, Value};
use uuid::Uuid;

pub const TENANT: &str = "acme";
pub const INSTANCE: &str = "inst-1";

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub supervisor: Arc<Supervisor>,
    pub adapter: Arc<ScriptedAdapter>,
}

pub fn scripted_provider(id: &str) -> ProviderConfig {
    ProviderConfig {
        id: id.into(),
        kind: ProviderKind::Scripted,
        base_url: None,
        api_key_env: None,
        default_model: None,
        command: None,
        args: Vec::new(),
        env: Default::default(),
    }
}

pub fn config(dir: &std::path::Path, supervisor: SupervisorConfig) -> Config {
    Config {
        store: StoreConfig {
            state_path: dir.to_path_buf(),
            retry_base_delay_ms: 1,
            ..Default::default()
        },
        supervisor,
        providers: vec![scripted_provider("dev")],
        ..Default::default()
    }
}

/// Tenant `acme` with one instance of agent `analyst` on model `echo`
/// (provider `dev`).
pub fn seed(router: &TenantRouter) {
    router
        .create_tenant(NewTenant {
            tenant_id: TENANT.into(),
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
                json!({
                    "agent_id": "analyst",
                    "name": "Analyst",
                    "system_prompt": "You analyse {{region}}.",
                    "default_model": "echo",
                    "template_variables": {"region": "eu-west"}
                }),
            )
            .unwrap(),
        )
        .unwrap();
    router
        .partition(TENANT)
        .unwrap()
        .instances
        .create(
            Instance::create(
                TENANT,
                NewInstance {
                    instance_id: Some(INSTANCE.into()),
                    agent_id: "analyst".into(),
                    ..Default::default()
                },
                "Analyst",
            )
            .unwrap(),
        )
        .unwrap();
}

pub fn harness_with(adapter: ScriptedAdapter, supervisor: SupervisorConfig) -> Harness {
    harness_with_store(adapter, supervisor, |_| {})
}

/// Like [`harness_with`], with a hook to adjust the store section.
pub fn harness_with_store(
    adapter: ScriptedAdapter,
    supervisor: SupervisorConfig,
    store: impl FnOnce(&mut StoreConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), supervisor);
    store(&mut config.store);
    let router = Arc::new(TenantRouter::open(&config.store).unwrap());
    seed(&router);
    let adapter = Arc::new(adapter);
    let mut adapters = AdapterRegistry::default();
    adapters.register(adapter.clone());
    let supervisor = Arc::new(Supervisor::new(router, Arc::new(adapters), &config).unwrap());
    Harness {
        dir,
        supervisor,
        adapter,
    }
}

pub fn harness(adapter: ScriptedAdapter) -> Harness {
    harness_with(
        adapter,
        SupervisorConfig {
            cancel_grace_ms: 100,
            ..Default::default()
        },
    )
}

pub fn request(input: Value) -> CreateRun {
    CreateRun {
        instance_id: INSTANCE.into(),
        input,
        ..Default::default()
    }
}

impl Harness {
    pub async fn create(&self, input: Value) -> Run {
        self.supervisor.create_run(TENANT, request(input)).await.unwrap()
    }

    pub async fn get(&self, run_id: &Uuid) -> Run {
        self.supervisor.get_run(TENANT, run_id).await.unwrap()
    }

    /// Path of one of the tenant's journals, e.g. `runs.jsonl`.
    pub fn journal(&self, name: &str) -> PathBuf {
        self.dir
            .path()
            .join("partitions")
            .join(format!("{}{TENANT}", StoreConfig::default().partition_prefix))
            .join(name)
    }

    /// Make a journal unwritable by putting a directory in its place.
    /// Returns the displaced file so [`Harness::restore_journal`] can put
    /// it back.
    pub fn break_journal(&self, name: &str) -> PathBuf {
        let path = self.journal(name);
        let saved = path.with_extension("saved");
        if path.exists() {
            std::fs::rename(&path, &saved).unwrap();
        } else {
            std::fs::write(&saved, "").unwrap();
        }
        std::fs::create_dir(&path).unwrap();
        saved
    }

    pub fn restore_journal(&self, name: &str, saved: PathBuf) {
        let path = self.journal(name);
        std::fs::remove_dir(&path).unwrap();
        std::fs::rename(saved, path).unwrap();
    }

    /// Poll until the run reaches a terminal state.
    pub async fn wait_terminal(&self, run_id: &Uuid) -> Run {
        for _ in 0..400 {
            let run = self.get(run_id).await;
            if run.state.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} never finished");
    }
}
