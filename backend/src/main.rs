use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ssm_backend::config::Config;
use ssm_backend::triggers::{InMemoryStore, SchemaRegistry, TriggerSystem};
use ssm_backend::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ssm_backend=info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = Arc::new(InMemoryStore::new());

    let (triggers, report) = TriggerSystem::bootstrap(&config.triggers, store, SchemaRegistry::new(), Vec::new())?;
    tracing::info!(
        "Components initialized: {}",
        report.components_initialized.join(", ")
    );

    let state = Arc::new(AppState {
        triggers: triggers.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    triggers.shutdown();
    Ok(())
}
