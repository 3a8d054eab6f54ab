// Hour Bank - API Server
// REST API with Axum over the SQLite store.

use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use hour_bank::{router, setup_database, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;

    let conn = Connection::open(&config.database_path)?;
    setup_database(&conn)?;
    tracing::info!(path = ?config.database_path, "database ready");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(conn, config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
