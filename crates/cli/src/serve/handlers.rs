//! Route handlers. Each one resolves its inputs, calls the engine as the
//! authenticated actor, and serializes the record it gets back.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use postmortem_core::{ContentDraft, ReviewDecision};
use postmortem_engine::{Actor, HypothesisSuggester, ListFilter, NewAnalysis, NewTask};

use super::error::ApiError;
use super::state::AppState;

type ApiResult = Result<Response, ApiError>;

fn respond<T: Serialize>(status: StatusCode, value: T) -> ApiResult {
    Ok((status, Json(value)).into_response())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(value)| value)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct Versioned {
    expected_version: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignRequest {
    assignee: String,
    expected_version: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateContentRequest {
    expected_version: i64,
    content: ContentDraft,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewRequest {
    expected_version: i64,
    decision: ReviewDecision,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportQuery {
    analysis_id: Option<String>,
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    ApiError::RouteNotFound
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// GET /capabilities
pub(crate) async fn handle_capabilities(Extension(actor): Extension<Actor>) -> ApiResult {
    respond(
        StatusCode::OK,
        json!({
            "user": actor.id,
            "role": actor.role,
            "actions": actor.role.capabilities(),
            "visibility": actor.role.visibility(),
        }),
    )
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// POST /tasks
pub(crate) async fn handle_create_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult {
    let input = body(payload)?;
    let task = state.workflow.tasks.create_task(&actor, input).await?;
    respond(StatusCode::CREATED, task)
}

/// GET /tasks
pub(crate) async fn handle_list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
) -> ApiResult {
    let tasks = state.workflow.tasks.list_tasks(&actor).await?;
    respond(StatusCode::OK, json!({ "tasks": tasks }))
}

/// GET /tasks/{id}
pub(crate) async fn handle_get_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state.workflow.tasks.get_task(&actor, &id).await?;
    respond(StatusCode::OK, task)
}

/// POST /tasks/{id}/assign
pub(crate) async fn handle_assign_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let task = state
        .workflow
        .tasks
        .assign_task(&actor, &id, &req.assignee, req.expected_version)
        .await?;
    respond(StatusCode::OK, task)
}

/// POST /tasks/{id}/start
pub(crate) async fn handle_start_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<Versioned>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let task = state
        .workflow
        .tasks
        .start_task(&actor, &id, req.expected_version)
        .await?;
    respond(StatusCode::OK, task)
}

/// POST /tasks/{id}/complete
pub(crate) async fn handle_complete_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<Versioned>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let task = state
        .workflow
        .tasks
        .complete_task(&actor, &id, req.expected_version)
        .await?;
    respond(StatusCode::OK, task)
}

// ── Analyses ─────────────────────────────────────────────────────────────────

/// POST /analysis
pub(crate) async fn handle_create_analysis(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    payload: Result<Json<NewAnalysis>, JsonRejection>,
) -> ApiResult {
    let input = body(payload)?;
    let analysis = state.workflow.analyses.create(&actor, input).await?;
    respond(StatusCode::CREATED, analysis)
}

/// GET /analysis?task_id=..&status=..
pub(crate) async fn handle_list_analyses(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    params: Result<Query<ListFilter>, QueryRejection>,
) -> ApiResult {
    let filter = query(params)?;
    let analyses = state.workflow.analyses.list(&actor, filter).await?;
    respond(StatusCode::OK, json!({ "analyses": analyses }))
}

/// GET /analysis/{id}
pub(crate) async fn handle_get_analysis(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let analysis = state.workflow.analyses.get(&actor, &id).await?;
    respond(StatusCode::OK, analysis)
}

/// PATCH /analysis/{id}
pub(crate) async fn handle_update_content(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let analysis = state
        .workflow
        .analyses
        .update_content(&actor, &id, req.expected_version, req.content)
        .await?;
    respond(StatusCode::OK, analysis)
}

/// POST /analysis/{id}/submit
pub(crate) async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<Versioned>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let analysis = state
        .workflow
        .analyses
        .submit(&actor, &id, req.expected_version)
        .await?;
    respond(StatusCode::OK, analysis)
}

/// POST /analysis/{id}/review
pub(crate) async fn handle_review(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let analysis = state
        .workflow
        .analyses
        .review(
            &actor,
            &id,
            req.expected_version,
            req.decision,
            req.feedback.as_deref(),
        )
        .await?;
    respond(StatusCode::OK, analysis)
}

/// POST /analysis/{id}/reopen
pub(crate) async fn handle_reopen(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<Versioned>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let analysis = state
        .workflow
        .analyses
        .reopen(&actor, &id, req.expected_version)
        .await?;
    respond(StatusCode::OK, analysis)
}

/// GET /analysis/{id}/history
pub(crate) async fn handle_history(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let history = state.workflow.analyses.history(&actor, &id).await?;
    respond(StatusCode::OK, json!({ "history": history }))
}

/// GET /analysis/{id}/revisions
pub(crate) async fn handle_revisions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let revisions = state.workflow.analyses.revisions(&actor, &id).await?;
    respond(StatusCode::OK, json!({ "revisions": revisions }))
}

/// GET /analysis/{id}/revisions/{n}
pub(crate) async fn handle_revision_at(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path((id, n)): Path<(String, u64)>,
) -> ApiResult {
    let revision = state.workflow.analyses.revision_at(&actor, &id, n).await?;
    respond(StatusCode::OK, revision)
}

/// GET /analysis/{id}/submission
pub(crate) async fn handle_submission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let revision = state
        .workflow
        .analyses
        .snapshot_at_submission(&actor, &id)
        .await?;
    respond(StatusCode::OK, revision)
}

/// GET /analysis/{id}/audit
pub(crate) async fn handle_audit(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let report = state.workflow.analyses.verify_audit(&actor, &id).await?;
    respond(
        StatusCode::OK,
        json!({
            "intact": report.is_intact(),
            "report": report,
        }),
    )
}

/// POST /analysis/{id}/suggestions
pub(crate) async fn handle_suggestions(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let hypotheses = state
        .workflow
        .analyses
        .suggest_hypotheses(&actor, &id, &state.suggester)
        .await?;
    respond(
        StatusCode::OK,
        json!({
            "suggester": state.suggester.name(),
            "hypotheses": hypotheses,
        }),
    )
}

/// GET /analysis/{id}/report-eligibility
pub(crate) async fn handle_report_eligibility(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let eligible = state
        .workflow
        .analyses
        .can_generate_report(&id, actor.role)
        .await?;
    respond(
        StatusCode::OK,
        json!({
            "analysis_id": id,
            "role": actor.role,
            "eligible": eligible,
        }),
    )
}

// ── Reports ──────────────────────────────────────────────────────────────────

/// POST /analysis/{id}/reports
pub(crate) async fn handle_generate_report(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult {
    let report = state.workflow.reports.generate_report(&actor, &id).await?;
    respond(StatusCode::CREATED, report)
}

/// GET /reports?analysis_id=..
pub(crate) async fn handle_list_reports(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    params: Result<Query<ReportQuery>, QueryRejection>,
) -> ApiResult {
    let q = query(params)?;
    let reports = state
        .workflow
        .reports
        .list_reports(&actor, q.analysis_id.as_deref())
        .await?;
    respond(StatusCode::OK, json!({ "reports": reports }))
}
