//! Timeline endpoint

use axum::{
    extract::{Path, Query, State},
    response::Json,
};

use super::dto::TimelineParams;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::TimelinePage;

/// GET /api/v1/profiles/:id/timeline
///
/// # Query
/// * `cursor` - `next_cursor` from the previous page
/// * `limit` - Page size (default 20, capped by configuration)
pub async fn get_timeline(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(profile_id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<TimelinePage>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/api/v1/profiles/:id/timeline"])
        .start_timer();

    let page = state
        .timeline
        .get_timeline(&user.id, &profile_id, params.cursor.as_deref(), params.limit)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/profiles/:id/timeline", "200"])
        .inc();
    Ok(Json(page))
}
