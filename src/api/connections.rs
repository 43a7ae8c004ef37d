//! Connection endpoints
//!
//! Connections are listed and created under their profile; everything
//! else addresses the connection directly. Ownership is checked by the
//! service on every call.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{Map, Value};

use super::dto::{DisconnectParams, RefreshAllResponse};
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::{Account, Filter};
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::{AccountStatus, ConnectionView, ManualConnection, NewFilter};
use crate::sync::AccountSettings;

/// GET /api/v1/profiles/:id/connections
pub async fn list_connections(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(profile_id): Path<String>,
) -> Result<Json<Vec<ConnectionView>>, AppError> {
    let connections = state.connections.list(&user.id, &profile_id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/profiles/:id/connections", "200"])
        .inc();
    Ok(Json(connections))
}

/// POST /api/v1/profiles/:id/connections
///
/// Connects with a caller-supplied token (or none, for the task tracker).
/// OAuth platforms are normally connected through `/auth/:platform`.
pub async fn create_connection(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(profile_id): Path<String>,
    Json(input): Json<ManualConnection>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state
        .connections
        .create(&user.id, &profile_id, input)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/profiles/:id/connections", "201"])
        .inc();
    Ok((StatusCode::CREATED, Json(account)))
}

/// DELETE /api/v1/connections/:id[?hard=true]
pub async fn delete_connection(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
    Query(params): Query<DisconnectParams>,
) -> Result<StatusCode, AppError> {
    state
        .connections
        .disconnect(&user.id, &account_id, params.hard)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/v1/connections/:id", "204"])
        .inc();
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/connections/:id/refresh
///
/// Fetches immediately. Upstream failures are reported in the body, not
/// as an error status.
pub async fn refresh_connection(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
) -> Result<Json<AccountStatus>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/api/v1/connections/:id/refresh"])
        .start_timer();

    let status = state.connections.refresh(&user.id, &account_id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/connections/:id/refresh", "200"])
        .inc();
    Ok(Json(status))
}

/// POST /api/v1/profiles/:id/connections/refresh
pub async fn refresh_profile_connections(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(profile_id): Path<String>,
) -> Result<(StatusCode, Json<RefreshAllResponse>), AppError> {
    let account_ids = state
        .connections
        .refresh_all(&user.id, &profile_id)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/profiles/:id/connections/refresh", "202"])
        .inc();
    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshAllResponse {
            dispatched: account_ids.len(),
            account_ids,
        }),
    ))
}

/// GET /api/v1/connections/:id/settings
pub async fn get_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
) -> Result<Json<AccountSettings>, AppError> {
    let settings = state
        .connections
        .get_settings(&user.id, &account_id)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/connections/:id/settings", "200"])
        .inc();
    Ok(Json(settings))
}

/// PUT /api/v1/connections/:id/settings
///
/// Body is an object of setting keys; `null` resets a key.
pub async fn update_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
    Json(changes): Json<Map<String, Value>>,
) -> Result<Json<AccountSettings>, AppError> {
    let settings = state
        .connections
        .update_settings(&user.id, &account_id, changes)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["PUT", "/api/v1/connections/:id/settings", "200"])
        .inc();
    Ok(Json(settings))
}

/// GET /api/v1/connections/:id/filters
pub async fn list_filters(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Filter>>, AppError> {
    let filters = state
        .connections
        .list_filters(&user.id, &account_id)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/connections/:id/filters", "200"])
        .inc();
    Ok(Json(filters))
}

/// POST /api/v1/connections/:id/filters
pub async fn add_filter(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(account_id): Path<String>,
    Json(input): Json<NewFilter>,
) -> Result<(StatusCode, Json<Filter>), AppError> {
    let filter = state
        .connections
        .add_filter(&user.id, &account_id, input)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/connections/:id/filters", "201"])
        .inc();
    Ok((StatusCode::CREATED, Json(filter)))
}

/// DELETE /api/v1/connections/:id/filters/:filter_id
pub async fn remove_filter(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((account_id, filter_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state
        .connections
        .remove_filter(&user.id, &account_id, &filter_id)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/v1/connections/:id/filters/:filter_id", "204"])
        .inc();
    Ok(StatusCode::NO_CONTENT)
}
