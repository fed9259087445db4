use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use docuhub_types::models::Activity;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<u32>,
}

/// GET /api/activities?limit=N
///
/// The feed is shared by every signed-in user, newest first.
pub async fn list_activities(
    State(state): State<AppState>,
    query: Result<Query<ActivityQuery>, QueryRejection>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.db.list_activities(query.limit)?))
}
