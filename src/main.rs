use cinetrack::{
    api::{create_router, AppState},
    config::Config,
    services::progress_store::PROGRESS_MAX_AGE_MILLIS,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cinetrack=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config)?;

    // Drop anything past the retention window before the first read
    let expired = state
        .store
        .run_blocking(|store| store.remove_expired(PROGRESS_MAX_AGE_MILLIS))
        .await?;
    if expired > 0 {
        tracing::info!(expired, "Purged stale watch progress");
    }

    state.spawn_session_reaper(SESSION_REAP_INTERVAL);
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
