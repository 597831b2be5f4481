use anyhow::Context;
use tracing_subscriber::EnvFilter;

use custom_modules_api::app::{self, AppState};
use custom_modules_api::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SECURITY_JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn")),
        )
        .init();

    let config = config::config().clone();
    tracing::info!("Starting Custom Modules API in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("SECURITY_JWT_SECRET must be set outside development");
    }

    let store = app::connect_store(&config.storage)
        .await
        .context("failed to open storage")?;
    let bind_addr = config.bind_addr();
    let state = AppState::new(store, config).context("failed to apply collection migrations")?;
    app::bootstrap(&state).await.context("bootstrap failed")?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Custom Modules API listening on http://{}", bind_addr);
    axum::serve(listener, app::router(state)).await?;
    Ok(())
}
