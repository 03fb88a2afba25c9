use std::collections::BTreeMap;
use std::path::Path;

use af_domain::error::{Error, Result};
use af_domain::instance::{Instance, InstanceUpdate};
use parking_lot::RwLock;

use crate::journal::Journal;

/// Tenant-scoped instance configurations, keyed by instance id.
pub struct InstanceStore {
    instances: RwLock<BTreeMap<String, Instance>>,
    journal: Journal,
}

impl InstanceStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Journal::new(dir.join("instances.jsonl"));
        let mut instances = BTreeMap::new();
        for inst in journal.load::<Instance>()? {
            instances.insert(inst.instance_id.clone(), inst);
        }
        Ok(Self {
            instances: RwLock::new(instances),
            journal,
        })
    }

    pub fn create(&self, instance: Instance) -> Result<Instance> {
        let mut map = self.instances.write();
        if map.contains_key(&instance.instance_id) {
            return Err(Error::Validation(format!(
                "instance '{}' already exists",
                instance.instance_id
            )));
        }
        self.journal.append(&instance)?;
        map.insert(instance.instance_id.clone(), instance.clone());
        Ok(instance)
    }

    pub fn get(&self, instance_id: &str) -> Result<Instance> {
        self.instances
            .read()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_owned()))
    }

    /// Apply a partial update. Returns `(before, after)` for auditing.
    pub fn update(&self, instance_id: &str, update: InstanceUpdate) -> Result<(Instance, Instance)> {
        let mut map = self.instances.write();
        let before = map
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_owned()))?;
        let mut after = before.clone();
        after.apply(update);
        self.journal.append(&after)?;
        map.insert(instance_id.to_owned(), after.clone());
        Ok((before, after))
    }

    /// Ordered by name, then id.
    pub fn list(&self, include_inactive: bool) -> Vec<Instance> {
        let mut out: Vec<Instance> = self
            .instances
            .read()
            .values()
            .filter(|i| include_inactive || i.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.instance_id.cmp(&b.instance_id)));
        out
    }

    pub fn count(&self) -> usize {
        self.instances.read().values().filter(|i| i.active).count()
    }
}
