//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;
use widgetstore_checkout::CheckoutOrchestrator;
use widgetstore_shared::Repository;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: CheckoutOrchestrator,
    pub repository: Arc<dyn Repository>,
    /// Present when backed by Postgres; used by the health checks
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(orchestrator: CheckoutOrchestrator, pool: Option<PgPool>) -> Self {
        Self {
            repository: orchestrator.repository().clone(),
            orchestrator,
            pool,
        }
    }
}
