//! Ingestion requests. The state machine itself runs in `docuhub-pipeline`;
//! this module only creates, reads and deletes the records and hands new
//! ones to the worker.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use docuhub_db::Database;
use docuhub_pipeline::{Pipeline, QUEUED_MESSAGE};
use docuhub_types::api::{CreateIngestionRequest, MessageResponse};
use docuhub_types::models::Ingestion;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{PathId, ValidJson};
use crate::middleware::Principal;

/// Queue an ingestion for a document the caller may act on.
pub async fn submit(
    db: &Database,
    pipeline: &Pipeline,
    principal: &Principal,
    document_id: i64,
) -> Result<Ingestion, ApiError> {
    let document = db
        .get_document(document_id)?
        .ok_or_else(|| ApiError::not_found("Document"))?;

    if !principal.can_access(document.user_id) {
        return Err(ApiError::Forbidden(
            "You don't have permission to ingest this document".into(),
        ));
    }

    let ingestion = db.create_ingestion(document.id, principal.id, QUEUED_MESSAGE)?;
    pipeline.submit(&ingestion).await;

    info!(
        "Ingestion {} queued for document {} by user {}",
        ingestion.id, document.id, principal.id
    );
    Ok(ingestion)
}

pub async fn remove(
    db: &Database,
    pipeline: &Pipeline,
    principal: &Principal,
    id: i64,
) -> Result<(), ApiError> {
    let ingestion = db
        .get_ingestion(id)?
        .ok_or_else(|| ApiError::not_found("Ingestion"))?;

    // The submitter and the document's owner may both remove it.
    let document_owner = db.get_document(ingestion.document_id)?.map(|d| d.user_id);
    if !principal.can_access(ingestion.user_id) && document_owner != Some(principal.id) {
        return Err(ApiError::Forbidden(
            "You don't have permission to delete this ingestion".into(),
        ));
    }

    pipeline.cancel(id).await;
    if !db.delete_ingestion(id)? {
        return Err(ApiError::not_found("Ingestion"));
    }

    info!("Ingestion {} deleted by user {}", id, principal.id);
    Ok(())
}

// -- Handlers --

/// POST /api/ingestions
pub async fn create_ingestion(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<CreateIngestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ingestion = submit(&state.db, &state.pipeline, &principal, req.document_id).await?;
    Ok((StatusCode::CREATED, Json(ingestion)))
}

/// GET /api/ingestions
pub async fn list_ingestions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Ingestion>>, ApiError> {
    Ok(Json(state.db.list_ingestions(None)?))
}

/// GET /api/ingestions/{id}
pub async fn get_ingestion(
    State(state): State<AppState>,
    PathId(id): PathId,
) -> Result<Json<Ingestion>, ApiError> {
    let ingestion = state
        .db
        .get_ingestion(id)?
        .ok_or_else(|| ApiError::not_found("Ingestion"))?;
    Ok(Json(ingestion))
}

/// DELETE /api/ingestions/{id}
pub async fn delete_ingestion(
    State(state): State<AppState>,
    PathId(id): PathId,
    Extension(principal): Extension<Principal>,
) -> Result<Json<MessageResponse>, ApiError> {
    remove(&state.db, &state.pipeline, &principal, id).await?;
    Ok(Json(MessageResponse::new("Ingestion deleted successfully")))
}
