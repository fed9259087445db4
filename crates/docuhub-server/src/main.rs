mod cleanup;
mod config;

use std::sync::Arc;

use axum::http::{Method, header::CONTENT_TYPE};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use docuhub_api::auth::ensure_admin;
use docuhub_api::{AppState, AppStateInner};
use docuhub_db::Database;
use docuhub_pipeline::Pipeline;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docuhub=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Everything lives in memory and is gone on restart.
    let db = Arc::new(Database::open_in_memory()?);
    if let Some((username, password)) = config.admin_seed() {
        ensure_admin(&db, username, password)?;
    }

    let pipeline = Pipeline::new(db.clone(), config.timings());

    tokio::spawn(cleanup::run_session_sweep(db.clone(), config.session_sweep_secs));

    let state: AppState = Arc::new(AppStateInner {
        db,
        pipeline: pipeline.clone(),
        sessions: config.sessions(),
    });

    // Browser clients send the session cookie, so origins are mirrored
    // rather than wildcarded.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    let app = docuhub_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("DocuHub server listening on {}", addr);
    info!(
        "Sessions last {} hours; ingestion delays {:?} / {:?}",
        config.session_ttl_hours,
        config.timings().start_delay,
        config.timings().process_delay
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
