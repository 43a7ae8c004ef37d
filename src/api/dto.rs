//! Request and response DTOs
//!
//! Bodies owned by a single service (`NewProfile`, `ManualConnection`, ...)
//! live next to that service; this module holds the HTTP-only shapes.

use serde::{Deserialize, Serialize};

/// `GET /profiles/:id/timeline`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineParams {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

/// `DELETE /connections/:id`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisconnectParams {
    /// Delete the row instead of deactivating it
    #[serde(default)]
    pub hard: bool,
}

/// `GET /auth/:platform`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeParams {
    pub profile_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshAllResponse {
    pub dispatched: usize,
    pub account_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
