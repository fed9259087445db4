//! Document service and its handlers.
//!
//! Point reads and mutations look the document up first (missing ->
//! 404), then apply the ownership gate (not yours and not admin -> 403).
//! Create, edit and delete each append exactly one activity in the same
//! store transaction as the change.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use docuhub_db::Database;
use docuhub_db::models::{DocumentChanges, NewActivity};
use docuhub_pipeline::Pipeline;
use docuhub_types::api::{CreateDocumentRequest, MessageResponse, StarRequest, UpdateDocumentRequest};
use docuhub_types::models::{ActivityType, Document};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{PathId, ValidJson};
use crate::middleware::Principal;

fn load(db: &Database, principal: &Principal, id: i64, verb: &str) -> Result<Document, ApiError> {
    let document = db
        .get_document(id)?
        .ok_or_else(|| ApiError::not_found("Document"))?;

    if !principal.can_access(document.user_id) {
        return Err(ApiError::Forbidden(format!(
            "You don't have permission to {verb} this document"
        )));
    }
    Ok(document)
}

/// Admins see every document; everyone else only their own.
pub fn list(db: &Database, principal: &Principal) -> Result<Vec<Document>, ApiError> {
    let owner = if principal.is_admin() { None } else { Some(principal.id) };
    Ok(db.list_documents(owner)?)
}

pub fn create(
    db: &Database,
    principal: &Principal,
    req: &CreateDocumentRequest,
) -> Result<Document, ApiError> {
    let actor = principal.id;
    let document = db.create_document(actor, req.name.trim(), req.metadata.as_ref(), |d| {
        NewActivity::new(ActivityType::Upload, actor, "Document uploaded").document(d.id, &d.name)
    })?;

    info!("Document {} created by {} ({})", document.id, principal.username, actor);
    Ok(document)
}

pub fn fetch(db: &Database, principal: &Principal, id: i64) -> Result<Document, ApiError> {
    load(db, principal, id, "access")
}

pub fn update(
    db: &Database,
    principal: &Principal,
    id: i64,
    req: &UpdateDocumentRequest,
) -> Result<Document, ApiError> {
    load(db, principal, id, "edit")?;

    let changes = DocumentChanges {
        name: req.name.as_deref().map(str::trim),
        metadata: req.metadata.as_ref().map(Option::as_ref),
        starred: req.starred,
    };
    let actor = principal.id;
    db.update_document(id, &changes, |d| {
        NewActivity::new(ActivityType::Edit, actor, "Document edited").document(d.id, &d.name)
    })?
    .ok_or_else(|| ApiError::not_found("Document"))
}

pub fn set_starred(
    db: &Database,
    principal: &Principal,
    id: i64,
    starred: bool,
) -> Result<Document, ApiError> {
    load(db, principal, id, "star/unstar")?;
    db.set_document_starred(id, starred)?
        .ok_or_else(|| ApiError::not_found("Document"))
}

/// Stops the document's ingestions before the rows go away.
pub async fn remove(
    db: &Database,
    pipeline: &Pipeline,
    principal: &Principal,
    id: i64,
) -> Result<Document, ApiError> {
    load(db, principal, id, "delete")?;

    pipeline.cancel_document(id).await;

    let actor = principal.id;
    let document = db
        .delete_document(id, |d| {
            NewActivity::new(ActivityType::Delete, actor, "Document deleted").document(d.id, &d.name)
        })?
        .ok_or_else(|| ApiError::not_found("Document"))?;

    info!("Document {} deleted by {} ({})", id, principal.username, actor);
    Ok(document)
}

// -- Handlers --

/// GET /api/documents
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(list(&state.db, &principal)?))
}

/// POST /api/documents
pub async fn create_document(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<CreateDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let document = create(&state.db, &principal, &req)?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(fetch(&state.db, &principal, id)?))
}

/// PUT /api/documents/{id}
pub async fn update_document(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<UpdateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(update(&state.db, &principal, id, &req)?))
}

/// DELETE /api/documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
) -> Result<Json<MessageResponse>, ApiError> {
    remove(&state.db, &state.pipeline, &principal, id).await?;
    Ok(Json(MessageResponse::new("Document deleted successfully")))
}

/// PUT /api/documents/{id}/star
pub async fn star_document(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<StarRequest>,
) -> Result<Json<Document>, ApiError> {
    // Presence is guaranteed by StarRequest::validate.
    let starred = req.starred.unwrap_or_default();
    Ok(Json(set_starred(&state.db, &principal, id, starred)?))
}
