use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::{require_admin, require_auth};
use crate::{activities, documents, ingestions, qa, users};

/// Every HTTP route of the service, with state applied. Cross-cutting
/// layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route(
            "/api/documents",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/api/documents/{id}",
            get(documents::get_document)
                .put(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/api/documents/{id}/star", put(documents::star_document))
        .route("/api/activities", get(activities::list_activities))
        .route(
            "/api/ingestions",
            get(ingestions::list_ingestions).post(ingestions::create_ingestion),
        )
        .route(
            "/api/ingestions/{id}",
            get(ingestions::get_ingestion).delete(ingestions::delete_ingestion),
        )
        .route("/api/qa/query", post(qa::query))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // require_admin reads the Principal, so require_auth must run first
    // (outermost layer).
    let admin_routes = Router::new()
        .route("/api/users", get(users::list_users))
        .route(
            "/api/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
