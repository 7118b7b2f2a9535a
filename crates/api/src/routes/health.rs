//! Health checks for the load balancer and orchestration

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    /// `postgres` or `in_memory`
    pub store: &'static str,
    pub store_reachable: bool,
}

async fn store_reachable(state: &AppState) -> bool {
    match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Health check could not reach database");
                false
            }
        },
        None => true,
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let reachable = store_reachable(&state).await;
    let report = HealthReport {
        status: if reachable { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        store: if state.pool.is_some() {
            "postgres"
        } else {
            "in_memory"
        },
        store_reachable: reachable,
    };
    let code = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Ready once the store answers; checkouts cannot be recorded otherwise
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if store_reachable(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
