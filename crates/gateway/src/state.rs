use std::sync::Arc;
use std::time::Instant;

use af_domain::config::Config;
use af_providers::AdapterRegistry;
use af_store::TenantRouter;

use crate::runtime::Supervisor;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub router: Arc<TenantRouter>,
    pub adapters: Arc<AdapterRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub started_at: Instant,
}
