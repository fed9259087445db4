use axum::{Extension, Json, extract::State};

use docuhub_db::Database;
use docuhub_db::models::NewActivity;
use docuhub_types::api::{QueryRequest, QueryResponse, SourceCitation};
use docuhub_types::models::ActivityType;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::Principal;

/// Canned answer. No retrieval happens; the query is only logged.
pub fn answer(db: &Database, principal: &Principal, query: &str) -> Result<QueryResponse, ApiError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query is required".into()));
    }

    // The feed shows the query text in the document column.
    let mut activity = NewActivity::new(ActivityType::Query, principal.id, "Query executed");
    activity.document_name = Some(query.to_string());
    db.record_activity(&activity)?;

    Ok(QueryResponse {
        answer: format!("This is a simulated response to your query: {query}"),
        sources: vec![
            SourceCitation {
                document_id: 1,
                title: "Annual Report 2023.pdf".into(),
                relevance: 0.92,
            },
            SourceCitation {
                document_id: 3,
                title: "Q1 Financial Summary.xlsx".into(),
                relevance: 0.78,
            },
        ],
    })
}

/// POST /api/qa/query
pub async fn query(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    Ok(Json(answer(&state.db, &principal, &req.query)?))
}
