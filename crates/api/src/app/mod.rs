//! Application wiring: state, router, and route modules.

use std::sync::Arc;

use axum::{extract::Extension, Router};
use tower::ServiceBuilder;

use labbill_application::ApplicationService;
use labbill_infra::{LedgerStore, NotificationSink};
use labbill_settlement::SettlementReconciler;

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared per-request services. The store is exposed directly for the read
/// surface; writes go through the service and reconciler.
pub struct AppServices {
    pub store: Arc<dyn LedgerStore>,
    pub service: ApplicationService,
    pub reconciler: SettlementReconciler,
}

/// Build the full router over the given collaborators.
///
/// The store and sink are injected so tests can hold the in-memory
/// implementations and production can pass the Postgres-backed ones.
pub fn build_app(
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
    webhook_secret: String,
) -> Router {
    let services = Arc::new(AppServices {
        store: store.clone(),
        service: ApplicationService::new(store.clone(), notifier.clone()),
        reconciler: SettlementReconciler::new(store, notifier, webhook_secret),
    });

    routes::router().layer(ServiceBuilder::new().layer(Extension(services)))
}
