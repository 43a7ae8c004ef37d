//! Platform OAuth endpoints
//!
//! - GET /api/v1/auth/:platform?profile_id= - redirect to the platform's consent page
//! - GET /api/v1/auth/:platform/callback - platform redirects back here

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};

use super::dto::AuthorizeParams;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::metrics::HTTP_REQUESTS_TOTAL;
use crate::service::CallbackParams;

/// Start connecting a platform account to a profile
pub async fn authorize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(platform): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Result<Redirect, AppError> {
    let url = state
        .oauth
        .authorize(&user.id, &platform, &params.profile_id)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/auth/:platform", "303"])
        .inc();
    Ok(Redirect::to(&url))
}

/// OAuth callback
///
/// Unauthenticated: the sealed state identifies the user and profile.
/// Always redirects to the frontend, with `success=` or `error=`.
pub async fn callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let location = state.oauth.callback(&platform, params).await;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/auth/:platform/callback", "303"])
        .inc();
    Redirect::to(&location)
}
