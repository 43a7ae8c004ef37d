//! API layer
//!
//! HTTP handlers for:
//! - Profiles and their connections
//! - Per-connection settings and filters
//! - Profile timelines
//! - Platform OAuth connect flow
//! - Metrics (Prometheus)

mod connections;
mod dto;
pub mod metrics;
mod oauth;
mod profiles;
mod timeline;

pub use dto::*;
pub use metrics::metrics_router;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

/// Create the `/api/v1` router
///
/// Every route authenticates through the `CurrentUser` extractor except the
/// OAuth callback, which is reached by browser redirect.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // Profiles
        .route(
            "/profiles",
            get(profiles::list_profiles).post(profiles::create_profile),
        )
        .route(
            "/profiles/:id",
            get(profiles::get_profile)
                .patch(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/profiles/:id/timeline", get(timeline::get_timeline))
        // Connections
        .route(
            "/profiles/:id/connections",
            get(connections::list_connections).post(connections::create_connection),
        )
        .route(
            "/profiles/:id/connections/refresh",
            post(connections::refresh_profile_connections),
        )
        .route("/connections/:id", delete(connections::delete_connection))
        .route(
            "/connections/:id/refresh",
            post(connections::refresh_connection),
        )
        .route(
            "/connections/:id/settings",
            get(connections::get_settings).put(connections::update_settings),
        )
        .route(
            "/connections/:id/filters",
            get(connections::list_filters).post(connections::add_filter),
        )
        .route(
            "/connections/:id/filters/:filter_id",
            delete(connections::remove_filter),
        )
        // OAuth
        .route("/auth/:platform", get(oauth::authorize))
        .route("/auth/:platform/callback", get(oauth::callback))
}
