//! Tenant router: maps a tenant id to its isolated partition.
//!
//! Layout under `state_path`:
//!
//! ```text
//! master/tenants.jsonl
//! master/templates.jsonl
//! partitions/<prefix><tenant_id>/{runs,instances,usage,audit}.jsonl
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use af_domain::config::StoreConfig;
use af_domain::error::{Error, Result};
use af_domain::tenant::{validate_id, NewTenant, Tenant};
use parking_lot::RwLock;

use crate::journal::Journal;
use crate::partition::Partition;
use crate::templates::TemplateRegistry;

pub struct TenantRouter {
    partitions_dir: PathBuf,
    prefix: String,
    strict: bool,
    tenants: RwLock<HashMap<String, Tenant>>,
    tenant_journal: Journal,
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
    templates: TemplateRegistry,
}

impl TenantRouter {
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        let master = cfg.state_path.join("master");
        let partitions_dir = cfg.state_path.join("partitions");
        for dir in [&master, &partitions_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::PartitionUnavailable(format!("{}: {e}", dir.display())))?;
        }

        let tenant_journal = Journal::new(master.join("tenants.jsonl"));
        let mut tenants = HashMap::new();
        for t in tenant_journal.load::<Tenant>()? {
            tenants.insert(t.tenant_id.clone(), t);
        }
        tracing::info!(
            tenants = tenants.len(),
            strict = cfg.strict_tenants,
            path = %cfg.state_path.display(),
            "tenant router opened"
        );

        Ok(Self {
            partitions_dir,
            prefix: cfg.partition_prefix.clone(),
            strict: cfg.strict_tenants,
            tenants: RwLock::new(tenants),
            tenant_journal,
            partitions: RwLock::new(HashMap::new()),
            templates: TemplateRegistry::open(&master)?,
        })
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    // ── tenants ────────────────────────────────────────────────────

    /// Administrative tenant creation. The only way a tenant record comes
    /// into existence.
    pub fn create_tenant(&self, req: NewTenant) -> Result<Tenant> {
        let tenant = Tenant::from_request(req, &self.prefix)?;
        {
            let mut tenants = self.tenants.write();
            if tenants.contains_key(&tenant.tenant_id) {
                return Err(Error::TenantExists(tenant.tenant_id));
            }
            self.tenant_journal.append(&tenant)?;
            tenants.insert(tenant.tenant_id.clone(), tenant.clone());
        }
        self.partition(&tenant.tenant_id)?;
        tracing::info!(tenant_id = %tenant.tenant_id, partition = %tenant.partition, "tenant created");
        Ok(tenant)
    }

    pub fn get_tenant(&self, tenant_id: &str) -> Result<Tenant> {
        self.tenants
            .read()
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_owned()))
    }

    /// Active tenants, ordered by id.
    pub fn list_tenants(&self) -> Vec<Tenant> {
        let mut out: Vec<Tenant> = self
            .tenants
            .read()
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        out
    }

    // ── partitions ─────────────────────────────────────────────────

    /// Handle to `tenant_id`'s partition, opened lazily. In strict mode an
    /// unregistered (or deactivated) tenant is `TenantNotFound`.
    pub fn partition(&self, tenant_id: &str) -> Result<Arc<Partition>> {
        validate_id("tenant_id", tenant_id)?;
        if let Some(p) = self.partitions.read().get(tenant_id) {
            return Ok(p.clone());
        }
        if self.strict && !self.tenants.read().get(tenant_id).is_some_and(|t| t.active) {
            return Err(Error::TenantNotFound(tenant_id.to_owned()));
        }

        let mut partitions = self.partitions.write();
        if let Some(p) = partitions.get(tenant_id) {
            return Ok(p.clone());
        }
        let dir = self.partition_dir(tenant_id);
        let partition = Arc::new(Partition::open(tenant_id, &dir)?);
        tracing::debug!(tenant_id, dir = %dir.display(), "partition opened");
        partitions.insert(tenant_id.to_owned(), partition.clone());
        Ok(partition)
    }

    /// Open every partition present on disk (used by crash recovery).
    pub fn open_all(&self) -> Result<Vec<Arc<Partition>>> {
        let entries = std::fs::read_dir(&self.partitions_dir).map_err(|e| {
            Error::PartitionUnavailable(format!("{}: {e}", self.partitions_dir.display()))
        })?;
        let mut out = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(tenant_id) = name.strip_prefix(&self.prefix) else {
                continue;
            };
            match self.partition(tenant_id) {
                Ok(p) => out.push(p),
                Err(Error::TenantNotFound(_)) => {
                    tracing::warn!(tenant_id, "partition on disk for unknown tenant, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.tenant_id().cmp(b.tenant_id()));
        Ok(out)
    }

    fn partition_dir(&self, tenant_id: &str) -> PathBuf {
        self.partitions_dir.join(format!("{}{tenant_id}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn cfg(dir: &Path, strict: bool) -> StoreConfig {
        StoreConfig {
            state_path: dir.to_path_buf(),
            strict_tenants: strict,
            ..Default::default()
        }
    }

    fn new_tenant(id: &str) -> NewTenant {
        NewTenant {
            tenant_id: id.into(),
            display_name: id.to_uppercase(),
            ..Default::default()
        }
    }

    #[test]
    fn strict_mode_requires_registration() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantRouter::open(&cfg(dir.path(), true)).unwrap();
        assert!(matches!(
            router.partition("acme"),
            Err(Error::TenantNotFound(_))
        ));
        router.create_tenant(new_tenant("acme")).unwrap();
        assert!(router.partition("acme").is_ok());
        assert!(matches!(
            router.create_tenant(new_tenant("acme")),
            Err(Error::TenantExists(_))
        ));
    }

    #[test]
    fn lax_mode_creates_partition_but_no_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantRouter::open(&cfg(dir.path(), false)).unwrap();
        let p = router.partition("walk-in").unwrap();
        assert_eq!(p.tenant_id(), "walk-in");
        assert!(matches!(
            router.get_tenant("walk-in"),
            Err(Error::TenantNotFound(_))
        ));
        assert!(router.list_tenants().is_empty());
    }

    #[test]
    fn invalid_tenant_id_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantRouter::open(&cfg(dir.path(), false)).unwrap();
        assert!(matches!(
            router.partition("../escape"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn same_handle_for_same_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let router = TenantRouter::open(&cfg(dir.path(), false)).unwrap();
        let a = router.partition("acme").unwrap();
        let b = router.partition("acme").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_ne!(a.dir(), router.partition("globex").unwrap().dir());
    }

    #[test]
    fn tenants_and_partitions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let router = TenantRouter::open(&cfg(dir.path(), true)).unwrap();
            router.create_tenant(new_tenant("acme")).unwrap();
            router.create_tenant(new_tenant("globex")).unwrap();
        }
        let router = TenantRouter::open(&cfg(dir.path(), true)).unwrap();
        assert_eq!(router.list_tenants().len(), 2);
        let all = router.open_all().unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.tenant_id().to_owned()).collect();
        assert_eq!(ids, vec!["acme", "globex"]);
    }
}
