//! Widget store API server

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use widgetstore_api::{create_router, AppState, Config};
use widgetstore_checkout::{
    CheckoutOrchestrator, HttpInvoiceClient, InvoiceDispatcher, StripeGateway,
};
use widgetstore_shared::{create_pool, run_migrations, PgRepository};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("widgetstore_api=info,widgetstore_checkout=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    let repository = Arc::new(PgRepository::with_timeout(
        pool.clone(),
        config.repository_timeout,
    ));
    let invoices = InvoiceDispatcher::new(
        Arc::new(HttpInvoiceClient::new(&config.invoice)),
        repository.clone(),
        config.invoice.clone(),
    );
    let orchestrator = CheckoutOrchestrator::new(
        repository,
        Arc::new(StripeGateway::new()),
        config.gateway_credential(),
        invoices,
    );

    let app = create_router(AppState::new(orchestrator, Some(pool)));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Widget store API listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
