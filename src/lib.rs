//! Chronofeed - a multi-platform timeline synchronization engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Profiles, connections, settings, filters                 │
//! │  - Timelines                                                │
//! │  - Platform OAuth connect flow                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Fetch/snapshot orchestration, background refresh         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Sync Engine                            │
//! │  - Providers, normalizers, filters, circuit breaker         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `sync`: Providers, normalization, grouping, filtering, circuit breaker
//! - `data`: Database layer
//! - `auth`: API keys, credential vault, platform OAuth
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod sync;

use std::sync::Arc;
use tokio::task::JoinHandle;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is a shared handle.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Token encryption and API key hashing
    pub vault: Arc<auth::CredentialVault>,

    /// Background refresh dispatcher
    pub background: Arc<sync::BackgroundDispatcher>,

    pub profiles: Arc<service::ProfileService>,
    pub connections: Arc<service::ConnectionService>,
    pub timeline: Arc<service::TimelineService>,
    pub oauth: Arc<service::OAuthService>,
}

impl AppState {
    /// Initialize application state with live providers
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Derive the credential vault key
    /// 3. Build the HTTP client, providers and OAuth client
    /// 4. Wire services and start the background executor
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<(Self, JoinHandle<()>), error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Credential vault
        let vault = Arc::new(auth::CredentialVault::from_config(&config.security)?);
        tracing::info!("Credential vault ready");

        // 3. HTTP client, providers and OAuth client
        let http_client = reqwest::Client::builder()
            .user_agent(sync::USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let providers = Arc::new(sync::ProviderRegistry::live(
            &config,
            http_client.clone(),
            db.clone(),
        ));
        let oauth_client: Arc<dyn auth::OAuthClient> = Arc::new(auth::HttpOAuthClient::new(
            http_client,
            config.platforms.clone(),
            config.server.clone(),
            config.sync.fetch_timeout(),
        ));

        for platform in data::Platform::ALL {
            if config.platforms.get(platform).is_some() && !oauth_client.is_configured(platform) {
                tracing::info!(platform = platform.as_str(), "OAuth not configured");
            }
        }

        let assembled = Self::assemble(config, db, vault, providers, oauth_client);
        tracing::info!("Application state initialized successfully");
        Ok(assembled)
    }

    /// Wire services over already-built dependencies
    ///
    /// Spawns the background executor; its handle is returned alongside
    /// the state.
    pub fn assemble(
        config: config::AppConfig,
        db: Arc<data::Database>,
        vault: Arc<auth::CredentialVault>,
        providers: Arc<sync::ProviderRegistry>,
        oauth_client: Arc<dyn auth::OAuthClient>,
    ) -> (Self, JoinHandle<()>) {
        let fetcher = Arc::new(service::AccountFetcher::new(
            db.clone(),
            vault.clone(),
            providers,
            oauth_client.clone(),
            sync::BreakerPolicy::from_config(&config.sync),
            chrono::Duration::seconds(config.sync.snapshot_ttl_seconds.max(0)),
        ));

        let (dispatcher, handle) = sync::BackgroundDispatcher::spawn(
            fetcher.clone(),
            config.sync.background_queue_capacity,
        );
        let background = Arc::new(dispatcher);

        let profiles = Arc::new(service::ProfileService::new(db.clone()));
        let connections = Arc::new(service::ConnectionService::new(
            db.clone(),
            vault.clone(),
            fetcher.clone(),
            background.clone(),
        ));
        let timeline = Arc::new(service::TimelineService::new(
            db.clone(),
            fetcher,
            background.clone(),
            config.timeline.clone(),
        ));
        let oauth = Arc::new(service::OAuthService::new(
            db.clone(),
            vault.clone(),
            oauth_client,
            connections.clone(),
            background.clone(),
            &config.server.frontend_url,
            chrono::Duration::seconds(config.sync.oauth_state_ttl_seconds.max(1)),
        ));

        let state = Self {
            config: Arc::new(config),
            db,
            vault,
            background,
            profiles,
            connections,
            timeline,
            oauth,
        };
        (state, handle)
    }
}

/// Request bodies are small JSON documents
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api::api_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

/// Cross-origin access for the frontend
///
/// Permissive during local development; pinned to the frontend origin
/// once it is served over https.
fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    let frontend = server.frontend_url.trim_end_matches('/');
    if !frontend.starts_with("https://") {
        return CorsLayer::permissive();
    }

    match HeaderValue::from_str(frontend) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %frontend,
                "Failed to parse CORS origin from frontend URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> axum::Json<api::HealthResponse> {
    axum::Json(api::HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
