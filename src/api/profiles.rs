//! Profile endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::Profile;
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::{NewProfile, ProfilePatch};

/// GET /api/v1/profiles
pub async fn list_profiles(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Profile>>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/api/v1/profiles"])
        .start_timer();

    let profiles = state.profiles.list(&user.id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/profiles", "200"])
        .inc();
    Ok(Json(profiles))
}

/// POST /api/v1/profiles
pub async fn create_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<NewProfile>,
) -> Result<(StatusCode, Json<Profile>), AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/api/v1/profiles"])
        .start_timer();

    let profile = state.profiles.create(&user.id, input).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/profiles", "201"])
        .inc();
    Ok((StatusCode::CREATED, Json(profile)))
}

/// GET /api/v1/profiles/:id
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Profile>, AppError> {
    let profile = state.profiles.get(&user.id, &id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/profiles/:id", "200"])
        .inc();
    Ok(Json(profile))
}

/// PATCH /api/v1/profiles/:id
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>, AppError> {
    let profile = state.profiles.update(&user.id, &id, patch).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["PATCH", "/api/v1/profiles/:id", "200"])
        .inc();
    Ok(Json(profile))
}

/// DELETE /api/v1/profiles/:id
///
/// Cascades to the profile's connections and their filters, settings and
/// cached state.
pub async fn delete_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.profiles.delete(&user.id, &id).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["DELETE", "/api/v1/profiles/:id", "204"])
        .inc();
    Ok(StatusCode::NO_CONTENT)
}
