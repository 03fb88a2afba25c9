//! Master template registry.
//!
//! Readers take an `Arc<TemplateSnapshot>` and resolve against it without
//! holding any lock; writers build a new snapshot and swap it in. A lookup
//! that misses in the current snapshot re-reads the journal once before
//! giving up, so entries appended by another process become visible.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use af_domain::error::Result;
use af_domain::template::{TemplateEntry, TemplateKind};
use af_resolver::TemplateSource;
use parking_lot::RwLock;

use crate::journal::Journal;

/// Immutable view of every registry entry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct TemplateSnapshot {
    entries: BTreeMap<(TemplateKind, String), TemplateEntry>,
}

impl TemplateSnapshot {
    fn from_entries(entries: impl IntoIterator<Item = TemplateEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.insert((entry.kind(), entry.key().to_owned()), entry);
        }
        Self { entries: map }
    }

    pub fn get(&self, kind: TemplateKind, id: &str) -> Option<&TemplateEntry> {
        self.entries.get(&(kind, id.to_owned()))
    }

    /// Entries of one kind, ordered by id.
    pub fn list(&self, kind: TemplateKind, include_inactive: bool) -> Vec<TemplateEntry> {
        self.entries
            .iter()
            .filter(|((k, _), e)| *k == kind && (include_inactive || e.is_active()))
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TemplateSource for TemplateSnapshot {
    fn entry(&self, kind: TemplateKind, id: &str) -> Option<&TemplateEntry> {
        self.get(kind, id)
    }
}

pub struct TemplateRegistry {
    current: RwLock<Arc<TemplateSnapshot>>,
    journal: Journal,
}

impl TemplateRegistry {
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Journal::new(dir.join("templates.jsonl"));
        let snapshot = TemplateSnapshot::from_entries(journal.load::<TemplateEntry>()?);
        tracing::debug!(entries = snapshot.len(), "template registry loaded");
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            journal,
        })
    }

    pub fn snapshot(&self) -> Arc<TemplateSnapshot> {
        self.current.read().clone()
    }

    /// Snapshot guaranteed to be fresh for `(kind, id)`: if the entry is
    /// missing, the journal is re-read once.
    pub fn snapshot_for(&self, kind: TemplateKind, id: &str) -> Result<Arc<TemplateSnapshot>> {
        let snap = self.snapshot();
        if snap.get(kind, id).is_some() {
            return Ok(snap);
        }
        self.refresh()
    }

    /// Rebuild the snapshot from the journal.
    pub fn refresh(&self) -> Result<Arc<TemplateSnapshot>> {
        let fresh = Arc::new(TemplateSnapshot::from_entries(
            self.journal.load::<TemplateEntry>()?,
        ));
        *self.current.write() = fresh.clone();
        Ok(fresh)
    }

    /// Insert or replace an entry (templates are unversioned).
    pub fn upsert(&self, entry: TemplateEntry) -> Result<()> {
        let mut current = self.current.write();
        self.journal.append(&entry)?;
        let mut next = (**current).clone();
        next.entries
            .insert((entry.kind(), entry.key().to_owned()), entry);
        *current = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_domain::template::ToolEntry;
    use chrono::Utc;

    fn tool(id: &str, name: &str, active: bool) -> TemplateEntry {
        TemplateEntry::Tool(ToolEntry {
            tool_id: id.into(),
            name: name.into(),
            description: None,
            tool_type: "builtin".into(),
            category: String::new(),
            parameters_schema: serde_json::Value::Null,
            active,
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn upsert_replaces_and_old_snapshot_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TemplateRegistry::open(dir.path()).unwrap();
        reg.upsert(tool("search", "v1", true)).unwrap();
        let old = reg.snapshot();
        reg.upsert(tool("search", "v2", true)).unwrap();

        let name = |s: &TemplateSnapshot| match s.get(TemplateKind::Tool, "search") {
            Some(TemplateEntry::Tool(t)) => t.name.clone(),
            _ => String::new(),
        };
        assert_eq!(name(&old), "v1");
        assert_eq!(name(&reg.snapshot()), "v2");
    }

    #[test]
    fn list_hides_inactive_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TemplateRegistry::open(dir.path()).unwrap();
        reg.upsert(tool("a", "a", true)).unwrap();
        reg.upsert(tool("b", "b", false)).unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap.list(TemplateKind::Tool, false).len(), 1);
        assert_eq!(snap.list(TemplateKind::Tool, true).len(), 2);
        assert!(snap.list(TemplateKind::Agent, true).is_empty());
    }

    #[test]
    fn miss_reads_through_to_journal() {
        let dir = tempfile::tempdir().unwrap();
        let reg = TemplateRegistry::open(dir.path()).unwrap();
        // Another writer appends to the same journal.
        let other = TemplateRegistry::open(dir.path()).unwrap();
        other.upsert(tool("late", "late", true)).unwrap();

        assert!(reg.snapshot().get(TemplateKind::Tool, "late").is_none());
        let snap = reg.snapshot_for(TemplateKind::Tool, "late").unwrap();
        assert!(snap.get(TemplateKind::Tool, "late").is_some());
    }
}
