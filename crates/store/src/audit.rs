use std::collections::HashSet;
use std::path::Path;

use af_domain::audit::{AuditEntry, AuditFilter};
use af_domain::error::Result;
use parking_lot::RwLock;

use crate::journal::Journal;

const DEFAULT_QUERY_LIMIT: usize = 100;

/// Append-only audit trail for one tenant. Entries are never mutated.
pub struct AuditLog {
    inner: RwLock<Inner>,
    journal: Journal,
}

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    keys: HashSet<String>,
}

impl AuditLog {
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Journal::new(dir.join("audit.jsonl"));
        let mut inner = Inner::default();
        for entry in journal.load::<AuditEntry>()? {
            if let Some(key) = &entry.dedup_key {
                if !inner.keys.insert(key.clone()) {
                    continue;
                }
            }
            inner.entries.push(entry);
        }
        Ok(Self {
            inner: RwLock::new(inner),
            journal,
        })
    }

    /// Returns `false` when an entry with the same dedup key exists.
    pub fn record(&self, entry: AuditEntry) -> Result<bool> {
        let mut inner = self.inner.write();
        if let Some(key) = &entry.dedup_key {
            if inner.keys.contains(key) {
                return Ok(false);
            }
        }
        self.journal.append(&entry)?;
        if let Some(key) = &entry.dedup_key {
            inner.keys.insert(key.clone());
        }
        inner.entries.push(entry);
        Ok(true)
    }

    /// Newest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let limit = if filter.limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            filter.limit
        };
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }
}
