use std::collections::HashSet;
use std::path::Path;

use af_domain::error::Result;
use af_domain::usage::{UsageRecord, UsageSummary};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::journal::Journal;

/// Append-only usage rows for one tenant. Recording is idempotent per
/// `dedup_key`.
pub struct UsageLedger {
    inner: RwLock<Inner>,
    journal: Journal,
}

#[derive(Default)]
struct Inner {
    records: Vec<UsageRecord>,
    keys: HashSet<String>,
}

impl UsageLedger {
    pub fn open(dir: &Path) -> Result<Self> {
        let journal = Journal::new(dir.join("usage.jsonl"));
        let mut inner = Inner::default();
        for rec in journal.load::<UsageRecord>()? {
            if inner.keys.insert(rec.dedup_key.clone()) {
                inner.records.push(rec);
            }
        }
        Ok(Self {
            inner: RwLock::new(inner),
            journal,
        })
    }

    /// Returns `false` when the key was already recorded.
    pub fn record(&self, record: UsageRecord) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.keys.contains(&record.dedup_key) {
            tracing::debug!(key = %record.dedup_key, "usage already recorded");
            return Ok(false);
        }
        self.journal.append(&record)?;
        inner.keys.insert(record.dedup_key.clone());
        inner.records.push(record);
        Ok(true)
    }

    pub fn for_run(&self, run_id: &Uuid) -> Vec<UsageRecord> {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.run_id == *run_id)
            .cloned()
            .collect()
    }

    /// Totals and a `provider:model` breakdown within `[since, until)`.
    pub fn summary(
        &self,
        tenant_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> UsageSummary {
        let inner = self.inner.read();
        let mut summary = UsageSummary {
            tenant_id: tenant_id.to_owned(),
            since,
            until,
            ..Default::default()
        };
        let in_window = |r: &&UsageRecord| {
            since.map_or(true, |s| r.recorded_at >= s) && until.map_or(true, |u| r.recorded_at < u)
        };
        for r in inner.records.iter().filter(in_window) {
            summary.totals.add(&r.counters);
            summary.total_calls += 1;
            let m = summary
                .by_model
                .entry(format!("{}:{}", r.provider, r.model_id))
                .or_default();
            m.input_units += r.counters.input_units;
            m.output_units += r.counters.output_units;
            m.cost += r.counters.cost;
            m.calls += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_domain::usage::UsageCounters;

    fn record(run_id: Uuid, model: &str, input: u64) -> UsageRecord {
        UsageRecord {
            dedup_key: UsageRecord::key_for(&run_id, "completed"),
            tenant_id: "acme".into(),
            run_id,
            agent_id: "analyst".into(),
            provider: "scripted".into(),
            model_id: model.into(),
            counters: UsageCounters {
                input_units: input,
                output_units: 10,
                cost: 0.5,
            },
            usage_type: "execution".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn same_key_twice_counts_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::open(dir.path()).unwrap();
        let run = Uuid::new_v4();
        assert!(ledger.record(record(run, "echo-1", 100)).unwrap());
        let before = ledger.summary("acme", None, None);
        assert!(!ledger.record(record(run, "echo-1", 100)).unwrap());
        let after = ledger.summary("acme", None, None);
        assert_eq!(before, after);
        assert_eq!(after.totals.input_units, 100);
        assert_eq!(after.total_calls, 1);
    }

    #[test]
    fn dedup_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let run = Uuid::new_v4();
        UsageLedger::open(dir.path())
            .unwrap()
            .record(record(run, "echo-1", 5))
            .unwrap();
        let ledger = UsageLedger::open(dir.path()).unwrap();
        assert!(!ledger.record(record(run, "echo-1", 5)).unwrap());
        assert_eq!(ledger.for_run(&run).len(), 1);
    }

    #[test]
    fn summary_groups_by_provider_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::open(dir.path()).unwrap();
        ledger.record(record(Uuid::new_v4(), "echo-1", 1)).unwrap();
        ledger.record(record(Uuid::new_v4(), "echo-1", 2)).unwrap();
        ledger.record(record(Uuid::new_v4(), "echo-2", 4)).unwrap();
        let s = ledger.summary("acme", None, None);
        assert_eq!(s.by_model["scripted:echo-1"].calls, 2);
        assert_eq!(s.by_model["scripted:echo-1"].input_units, 3);
        assert_eq!(s.by_model["scripted:echo-2"].input_units, 4);
        assert_eq!(s.totals.input_units, 7);

        let future = ledger.summary("acme", Some(Utc::now() + chrono::Duration::hours(1)), None);
        assert_eq!(future.total_calls, 0);
    }
}
