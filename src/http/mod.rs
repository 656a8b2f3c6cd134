use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::{ServerConfig, WaitPolicy};
use crate::dispatch::{DispatchOutcome, Dispatcher, Job, JobMethod};
use crate::error::CourierError;
use crate::registry::{AgentRegistry, CompletionReport};
use crate::waiter::{await_result, hold_for_jobs, WaitOutcome};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub dispatcher: Dispatcher,
    /// Empty-queue hold schedule for the poll endpoint
    pub hold: WaitPolicy,
    /// Completion wait schedule for job-request endpoints
    pub wait: WaitPolicy,
}

impl AppState {
    pub fn new(registry: Arc<AgentRegistry>, hold: WaitPolicy, wait: WaitPolicy) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            hold,
            wait,
        }
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    job_id: Uuid,
    /// Omitted status is treated as terminal; anything other than
    /// "completed" is a progress report and is not applied
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payload: Value,
}

impl CompletionBody {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_deref(), None | Some("completed"))
    }
}

#[derive(Deserialize)]
struct PollRequest {
    #[serde(default)]
    completions: Vec<CompletionBody>,
}

#[derive(Serialize)]
struct PendingJob {
    job_id: Uuid,
    method: String,
    payload: Value,
}

#[derive(Serialize)]
struct PollResponse {
    jobs: Vec<PendingJob>,
}

#[derive(Serialize)]
struct JobRequestResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Serialize)]
struct JobDetail {
    job_id: Uuid,
    method: String,
    status: String,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobDetail {
    fn from_job(job: Job) -> Self {
        Self {
            job_id: job.id,
            method: job.method.to_string(),
            status: job.status.to_string(),
            payload: job.payload,
            data: job.response,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Serialize)]
struct AgentStatusResponse {
    agent_id: String,
    online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_seen_secs: Option<u64>,
    pending: usize,
    delivered: usize,
    completed: usize,
}

fn validation_error(kind: &str, message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": kind, "message": message })),
    )
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/agents/:agent_id/poll", post(poll_handler))
        // POST interprets the segment as a job method, GET as a job id
        .route(
            "/api/v1/agents/:agent_id/jobs/:job_ref",
            post(job_request_handler).get(job_lookup_handler),
        )
        .route("/api/v1/agents/:agent_id", get(agent_status_handler))
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP server until the shutdown token is cancelled.
pub async fn run_server(
    config: ServerConfig,
    registry: Arc<AgentRegistry>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::new(registry, config.hold, config.wait);
    let app = router(state);

    tracing::info!(addr = %config.listen_addr, "Starting courier server");

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Agent-facing endpoint. Applies completion reports, refreshes the
/// agent's last-seen time, then drains and returns the pending queue,
/// holding the request open on an empty queue.
async fn poll_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<PollRequest>,
) -> impl IntoResponse {
    if let Err(e) = AgentRegistry::validate_agent_id(&agent_id) {
        return validation_error("invalid_agent_id", e.to_string()).into_response();
    }

    let slot = state.registry.get_or_create(&agent_id).await;
    slot.touch().await;

    // Completions are applied before the drain, so a job reported
    // complete in this call cannot also be re-delivered by it
    let reports: Vec<CompletionReport> = body
        .completions
        .into_iter()
        .filter(|c| {
            if !c.is_terminal() {
                tracing::debug!(
                    job_id = %c.job_id,
                    status = c.status.as_deref().unwrap_or(""),
                    "Skipping non-terminal job report"
                );
            }
            c.is_terminal()
        })
        .map(|c| CompletionReport {
            job_id: c.job_id,
            payload: c.payload,
        })
        .collect();
    slot.record_completions(reports).await;

    let jobs = hold_for_jobs(&state.registry, &agent_id, state.hold).await;
    let jobs: Vec<PendingJob> = jobs
        .into_iter()
        .map(|job| PendingJob {
            job_id: job.id,
            method: job.method.to_string(),
            payload: job.payload,
        })
        .collect();

    Json(PollResponse { jobs }).into_response()
}

/// Caller-facing endpoint: create a job for the agent and wait for its
/// completion within the bounded window.
async fn job_request_handler(
    State(state): State<AppState>,
    Path((agent_id, method)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    if let Err(e) = AgentRegistry::validate_agent_id(&agent_id) {
        return validation_error("invalid_agent_id", e.to_string()).into_response();
    }
    let method: JobMethod = match method.parse() {
        Ok(m) => m,
        Err(e) => {
            return validation_error("unknown_method", e.to_string()).into_response();
        }
    };

    let job = match state.dispatcher.create_job(&agent_id, method, payload).await {
        DispatchOutcome::Created(job) => job,
        DispatchOutcome::Offline => {
            return Json(JobRequestResponse {
                status: "offline".to_string(),
                job_id: None,
                method: None,
                data: Some(json!({})),
            })
            .into_response();
        }
    };

    match await_result(&state.registry, &agent_id, &job.id, state.wait).await {
        WaitOutcome::Completed(job) => Json(JobRequestResponse {
            status: "completed".to_string(),
            job_id: Some(job.id),
            method: Some(job.method.to_string()),
            data: job.response,
        })
        .into_response(),
        // The job stays outstanding server-side; a later poll can
        // still drain or complete it
        WaitOutcome::TimedOut => Json(JobRequestResponse {
            status: "timeout".to_string(),
            job_id: Some(job.id),
            method: Some(job.method.to_string()),
            data: None,
        })
        .into_response(),
    }
}

/// Direct lookup by job id, for callers that received a timeout and
/// want to re-check later.
async fn job_lookup_handler(
    State(state): State<AppState>,
    Path((agent_id, job_ref)): Path<(String, String)>,
) -> impl IntoResponse {
    if let Err(e) = AgentRegistry::validate_agent_id(&agent_id) {
        return validation_error("invalid_agent_id", e.to_string()).into_response();
    }
    let job_id: Uuid = match job_ref.parse() {
        Ok(id) => id,
        Err(_) => {
            return validation_error(
                "invalid_job_id",
                format!("Invalid job id: {}", job_ref),
            )
            .into_response();
        }
    };

    let job = match state.registry.get(&agent_id).await {
        Some(slot) => slot.find_job(&job_id).await,
        None => None,
    };

    match job {
        Some(job) => Json(JobDetail::from_job(job)).into_response(),
        None => {
            let message = CourierError::JobNotFound(job_id.to_string()).to_string();
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "job_not_found", "message": message })),
            )
                .into_response()
        }
    }
}

async fn agent_status_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = AgentRegistry::validate_agent_id(&agent_id) {
        return validation_error("invalid_agent_id", e.to_string()).into_response();
    }

    let Some(slot) = state.registry.get(&agent_id).await else {
        let message = CourierError::AgentNotFound(agent_id).to_string();
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "agent_not_found", "message": message })),
        )
            .into_response();
    };

    let snapshot = slot.snapshot().await;
    let online = snapshot
        .online_for
        .map(|idle| idle < state.registry.freshness())
        .unwrap_or(false);

    Json(AgentStatusResponse {
        agent_id,
        online,
        last_seen_secs: snapshot.online_for.map(|d| d.as_secs()),
        pending: snapshot.pending,
        delivered: snapshot.delivered,
        completed: snapshot.completed,
    })
    .into_response()
}
