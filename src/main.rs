//! rowkeeper server
//!
//! Serves the REST API over the Sled store.
//!
//! Usage:
//!   cargo run --bin load_data    # seed demo data
//!   cargo run --bin rowkeeper    # start server
//!   # Then use rowkeeper-cli or curl against :11111

use tokio::net::TcpListener;

use rowkeeper::auth::TokenIssuer;
use rowkeeper::config::Config;
use rowkeeper::rest::create_router;
use rowkeeper::storage::Storage;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let _log_guard = rowkeeper::logging::init(&config);

    tracing::info!(
        data_dir = %config.data_dir.display(),
        bind = %config.bind,
        "rowkeeper starting"
    );
    if config.uses_dev_secret() {
        tracing::warn!("ROWKEEPER_JWT_SECRET not set, using the development secret");
    }

    let storage = Storage::open(&config.data_dir)?;
    let tokens = TokenIssuer::new(&config.jwt_secret, config.token_ttl_secs);
    let app = create_router(storage.clone(), tokens);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "REST API listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    storage.flush()?;
    Ok(())
}
