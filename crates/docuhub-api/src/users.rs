//! Admin-only user management. The admin gate is applied by the router.

use axum::{
    Extension, Json,
    extract::State,
};
use tracing::info;

use docuhub_db::Database;
use docuhub_db::models::UserChanges;
use docuhub_db::users::UserWrite;
use docuhub_pipeline::Pipeline;
use docuhub_types::api::{MessageResponse, UpdateUserRequest};
use docuhub_types::models::User;

use crate::auth::{AppState, hash_password};
use crate::error::ApiError;
use crate::extract::{PathId, ValidJson};
use crate::middleware::Principal;

pub fn update(db: &Database, id: i64, req: &UpdateUserRequest) -> Result<User, ApiError> {
    let password_hash = req.password.as_deref().map(hash_password).transpose()?;

    let changes = UserChanges {
        username: req.username.as_deref(),
        password_hash: password_hash.as_deref(),
        name: req.name.as_deref(),
        email: req.email.as_deref(),
        role: req.role,
    };

    match db.update_user(id, &changes)? {
        UserWrite::Written(user) => Ok(user),
        UserWrite::NotFound => Err(ApiError::not_found("User")),
        UserWrite::UsernameTaken => Err(ApiError::field("username", "Username already exists")),
    }
}

/// Deleting yourself is refused before the target is even looked up.
/// The user's documents, their ingestions and sessions go with them.
/// Ingestions the user queued on other people's documents keep running.
pub async fn remove(
    db: &Database,
    pipeline: &Pipeline,
    principal: &Principal,
    id: i64,
) -> Result<(), ApiError> {
    if id == principal.id {
        return Err(ApiError::BadRequest("Cannot delete your own account".into()));
    }

    let in_flight = db.ingestion_ids_for_user(id)?;
    pipeline.cancel_many(&in_flight).await;

    if !db.delete_user(id)? {
        return Err(ApiError::not_found("User"));
    }

    info!("User {} deleted by admin {}", id, principal.username);
    Ok(())
}

// -- Handlers --

/// GET /api/users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.db.list_users()?))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    PathId(id): PathId,
) -> Result<Json<User>, ApiError> {
    let user = state
        .db
        .get_user(id)?
        .ok_or_else(|| ApiError::not_found("User"))?;
    Ok(Json(user))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<AppState>,
    PathId(id): PathId,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(update(&state.db, id, &req)?))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
) -> Result<Json<MessageResponse>, ApiError> {
    remove(&state.db, &state.pipeline, &principal, id).await?;
    Ok(Json(MessageResponse::new("User deleted successfully")))
}
