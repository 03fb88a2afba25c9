//! Durable, per-tenant state: the tenant router and everything that lives in
//! a tenant partition (runs, instances, usage, audit), plus the shared
//! template registry.
//!
//! All collections are in-memory maps fronting an append-only JSONL journal.
//! A write reaches the journal before it becomes visible in memory, so a
//! lookup never returns something a restart would lose.

pub mod audit;
pub mod instances;
pub mod journal;
pub mod partition;
pub mod router;
pub mod runs;
pub mod templates;
pub mod usage;

pub use audit::AuditLog;
pub use instances::InstanceStore;
pub use partition::Partition;
pub use router::TenantRouter;
pub use runs::RunRegistry;
pub use templates::{TemplateRegistry, TemplateSnapshot};
pub use usage::UsageLedger;
