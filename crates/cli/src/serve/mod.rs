//! `postmortem serve` -- HTTP JSON API over the analysis workflow.
//!
//! Every route except `/health` requires an API key from the `[[users]]`
//! table, sent as `Authorization: Bearer <key>` or `X-API-Key: <key>`. The
//! key resolves to the acting user and role; the engine does the rest.
//!
//! Endpoints:
//! - GET   /health
//! - GET   /capabilities
//! - POST  /tasks, GET /tasks, GET /tasks/{id}
//! - POST  /tasks/{id}/assign | start | complete
//! - POST  /analysis, GET /analysis, GET /analysis/{id}, PATCH /analysis/{id}
//! - POST  /analysis/{id}/submit | review | reopen
//! - GET   /analysis/{id}/history | revisions | revisions/{n} | submission | audit
//! - POST  /analysis/{id}/suggestions
//! - GET   /analysis/{id}/report-eligibility
//! - POST  /analysis/{id}/reports, GET /reports
//!
//! Writes carry the caller's `expected_version` in the JSON body.

mod error;
mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use tower_http::cors::{Any, CorsLayer};

use postmortem_engine::{HeuristicSuggester, Workflow};
use postmortem_storage::MemoryStorage;

use crate::config::Config;

use self::handlers::*;
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

pub(crate) fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/capabilities", get(handle_capabilities))
        .route("/tasks", post(handle_create_task).get(handle_list_tasks))
        .route("/tasks/{id}", get(handle_get_task))
        .route("/tasks/{id}/assign", post(handle_assign_task))
        .route("/tasks/{id}/start", post(handle_start_task))
        .route("/tasks/{id}/complete", post(handle_complete_task))
        .route(
            "/analysis",
            post(handle_create_analysis).get(handle_list_analyses),
        )
        .route(
            "/analysis/{id}",
            get(handle_get_analysis).patch(handle_update_content),
        )
        .route("/analysis/{id}/submit", post(handle_submit))
        .route("/analysis/{id}/review", post(handle_review))
        .route("/analysis/{id}/reopen", post(handle_reopen))
        .route("/analysis/{id}/history", get(handle_history))
        .route("/analysis/{id}/revisions", get(handle_revisions))
        .route("/analysis/{id}/revisions/{n}", get(handle_revision_at))
        .route("/analysis/{id}/submission", get(handle_submission))
        .route("/analysis/{id}/audit", get(handle_audit))
        .route("/analysis/{id}/suggestions", post(handle_suggestions))
        .route(
            "/analysis/{id}/report-eligibility",
            get(handle_report_eligibility),
        )
        .route("/analysis/{id}/reports", post(handle_generate_report))
        .route("/reports", get(handle_list_reports))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let users = config.credentials();
    tracing::info!(
        users = users.len(),
        rate_limit = config.server.rate_limit,
        max_body_bytes = config.server.max_body_bytes,
        "loaded configuration"
    );

    let state = Arc::new(AppState {
        workflow: Workflow::with_defaults(Arc::new(MemoryStorage::new())),
        suggester: HeuristicSuggester,
        users,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
    });
    let app = router(state, config.server.max_body_bytes);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("postmortem listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(e) => {
            // Without a signal handler the server runs until killed.
            tracing::warn!(error = %e, "cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
