//! Chronofeed binary entry point

use chronofeed::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState (starts the background executor),
///    or run the `create-user` operator command instead
/// 5. Build Axum router
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("CHRONOFEED__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let default_filter = || {
        let level = std::env::var("CHRONOFEED__LOGGING__LEVEL").unwrap_or_else(|_| "info".into());
        format!("chronofeed={},tower_http=debug", level)
    };

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter().into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter().into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Chronofeed...");

    // 2. Initialize metrics
    chronofeed::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        public_url = %config.server.public_url,
        frontend_url = %config.server.frontend_url,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    // Operator command: `chronofeed create-user <name>`
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, name] = args.as_slice() {
        if command == "create-user" {
            return create_user(&config, name).await;
        }
        tracing::warn!(command = %command, "Unknown command; starting server");
    }

    // 4. Initialize application state
    let (state, background) = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = chronofeed::build_router(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last dispatcher handle; let queued jobs drain.
    if let Err(error) = background.await {
        tracing::warn!(%error, "Background executor ended abnormally");
    }

    Ok(())
}

/// Create a user and print a fresh API key for it
async fn create_user(config: &config::AppConfig, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = chronofeed::data::Database::connect(&config.database.path).await?;
    let vault = chronofeed::auth::CredentialVault::from_config(&config.security)?;

    let user = db.create_user(name).await?;
    let key = chronofeed::auth::issue_api_key(&db, &vault, &user.id, "default").await?;

    println!("user_id: {}", user.id);
    println!("api_key: {}", key);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
