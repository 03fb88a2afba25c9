pub mod audit;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod instances;
pub mod runs;
pub mod templates;
pub mod tenants;
pub mod usage;

use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Every tenant-scoped route carries the tenant id in its path; handlers
/// resolve the partition through the tenant router and never touch another
/// tenant's data.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        // Tenants
        .route(
            "/v1/tenants",
            post(tenants::create_tenant).get(tenants::list_tenants),
        )
        .route("/v1/tenants/:tenant", get(tenants::get_tenant))
        // Master templates
        .route("/v1/templates/:kind", get(templates::list_templates))
        .route(
            "/v1/templates/:kind/:id",
            get(templates::get_template).put(templates::put_template),
        )
        // Instances
        .route(
            "/v1/tenants/:tenant/instances",
            post(instances::create_instance).get(instances::list_instances),
        )
        .route(
            "/v1/tenants/:tenant/instances/:id",
            get(instances::get_instance).patch(instances::update_instance),
        )
        // Runs
        .route(
            "/v1/tenants/:tenant/runs",
            post(runs::create_run).get(runs::list_runs),
        )
        .route("/v1/tenants/:tenant/runs/:id", get(runs::get_run))
        .route("/v1/tenants/:tenant/runs/:id/cancel", post(runs::cancel_run))
        .route("/v1/tenants/:tenant/runs/:id/events", get(runs::run_events_sse))
        // Analytics
        .route("/v1/tenants/:tenant/usage", get(usage::usage_summary))
        .route("/v1/tenants/:tenant/audit", get(audit::query_audit))
        .route("/v1/tenants/:tenant/dashboard", get(dashboard::tenant_dashboard))
}
