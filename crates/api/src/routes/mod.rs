//! API routes

pub mod admin;
pub mod checkout;
pub mod health;
pub mod widgets;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Storefront routes
    let storefront_routes = Router::new()
        .route("/payment-intent", post(checkout::create_payment_intent))
        .route("/payment-succeeded", post(checkout::payment_succeeded))
        .route(
            "/create-customer-and-subscribe-to-plan",
            post(checkout::subscribe),
        )
        .route("/widget/:id", get(widgets::get_widget));

    // Back-office routes. Authentication is enforced in front of this service.
    let admin_routes = Router::new()
        .route("/admin/sales", get(admin::list_sales))
        .route("/admin/subscriptions", get(admin::list_subscriptions))
        .route("/admin/orders/:id", get(admin::get_order))
        .route("/admin/refund", post(admin::refund))
        .route("/admin/cancel-subscription", post(admin::cancel_subscription))
        .route(
            "/admin/virtual-terminal-succeeded",
            post(admin::virtual_terminal_succeeded),
        )
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id", get(admin::get_user));

    Router::new()
        .merge(health_routes)
        .nest("/api", storefront_routes.merge(admin_routes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
