use std::path::{Path, PathBuf};

use af_domain::error::Result;

use crate::audit::AuditLog;
use crate::instances::InstanceStore;
use crate::runs::RunRegistry;
use crate::usage::UsageLedger;

/// One tenant's isolated slice of storage. Each partition owns its own
/// directory; nothing in it is shared with any other partition.
pub struct Partition {
    tenant_id: String,
    dir: PathBuf,
    pub runs: RunRegistry,
    pub instances: InstanceStore,
    pub usage: UsageLedger,
    pub audit: AuditLog,
}

impl Partition {
    pub fn open(tenant_id: &str, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            af_domain::Error::PartitionUnavailable(format!("{}: {e}", dir.display()))
        })?;
        Ok(Self {
            tenant_id: tenant_id.to_owned(),
            dir: dir.to_path_buf(),
            runs: RunRegistry::open(dir)?,
            instances: InstanceStore::open(dir)?,
            usage: UsageLedger::open(dir)?,
            audit: AuditLog::open(dir)?,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
