use std::sync::Arc;

use tracing::info;

use ion_server::{Config, TYPING_SWEEP_PERIOD, build};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ion=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = Arc::new(ion_db::Database::open(&config.db_path)?);

    let (app, dispatcher) = build(&config, db);
    dispatcher.spawn_typing_sweeper(TYPING_SWEEP_PERIOD);

    let addr = config.addr()?;
    info!("Ion server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
