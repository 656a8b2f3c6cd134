use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use courier::config::WaitPolicy;
use courier::http::{router, AppState};
use courier::registry::AgentRegistry;

const AGENT: &str = "agent-0001-test";

fn test_app(hold: WaitPolicy, wait: WaitPolicy) -> (Router, Arc<AgentRegistry>) {
    let registry = Arc::new(AgentRegistry::new(Duration::from_secs(60)));
    let app = router(AppState::new(registry.clone(), hold, wait));
    (app, registry)
}

fn short_policies() -> (WaitPolicy, WaitPolicy) {
    (
        WaitPolicy::new(Duration::from_millis(20), 2),
        WaitPolicy::new(Duration::from_millis(20), 2),
    )
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn poll(app: &Router, agent_id: &str, completions: Value) -> (StatusCode, Value) {
    request(
        app,
        "POST",
        &format!("/api/v1/agents/{}/poll", agent_id),
        Some(json!({ "completions": completions })),
    )
    .await
}

#[tokio::test]
async fn poll_rejects_short_agent_id() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);

    let (status, body) = poll(&app, "short", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_agent_id");
    assert!(body["message"].as_str().unwrap().contains("short"));

    // Validation happens before any state is created
    assert_eq!(registry.agent_count().await, 0);
}

#[tokio::test]
async fn job_request_rejects_short_agent_id() {
    let (hold, wait) = short_policies();
    let (app, _registry) = test_app(hold, wait);

    let (status, body) = request(
        &app,
        "POST",
        "/api/v1/agents/short/jobs/call_sync",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_agent_id");
}

#[tokio::test]
async fn job_request_rejects_unknown_method() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);
    registry.get_or_create(AGENT).await.touch().await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/v1/agents/{}/jobs/reboot_machine", AGENT),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_method");
}

#[tokio::test]
async fn empty_poll_returns_no_jobs_after_hold() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);

    let started = std::time::Instant::now();
    let (status, body) = poll(&app, AGENT, json!([])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"], json!([]));
    // The empty response comes only after the hold budget
    assert!(started.elapsed() >= hold.budget());
    // The poll registered the agent and it is now online
    assert!(registry.is_online(AGENT).await);
}

#[tokio::test]
async fn job_request_for_offline_agent_short_circuits() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);

    let started = std::time::Instant::now();
    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/v1/agents/{}/jobs/launch_visualizer", AGENT),
        Some(json!({"runs": ["r1"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "offline");
    assert_eq!(body["data"], json!({}));
    assert!(body.get("job_id").is_none());
    // Returned immediately, no waiter invoked
    assert!(started.elapsed() < wait.budget());

    // No job was created
    let slot = registry.get(AGENT).await.unwrap();
    assert_eq!(slot.pending_len().await, 0);
}

/// Scenario A: create a job for an online agent, the agent's poll
/// drains it, the next poll reports the result, and the original
/// caller observes the completion before its deadline.
#[tokio::test]
async fn full_dispatch_round_trip() {
    let hold = WaitPolicy::new(Duration::from_millis(20), 2);
    let wait = WaitPolicy::new(Duration::from_millis(50), 40);
    let (app, _registry) = test_app(hold, wait);

    // Agent comes online with an initial empty poll
    let (status, _) = poll(&app, AGENT, json!([])).await;
    assert_eq!(status, StatusCode::OK);

    // Caller submits the job; it blocks waiting for the result
    let caller_app = app.clone();
    let caller = tokio::spawn(async move {
        request(
            &caller_app,
            "POST",
            &format!("/api/v1/agents/{}/jobs/launch_visualizer", AGENT),
            Some(json!({"runs": ["r1"]})),
        )
        .await
    });

    // Give the dispatcher time to enqueue
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The agent's poll drains exactly that job
    let (status, body) = poll(&app, AGENT, json!([])).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["method"], "launch_visualizer");
    assert_eq!(jobs[0]["payload"], json!({"runs": ["r1"]}));
    let job_id = jobs[0]["job_id"].as_str().unwrap().to_string();

    // The agent executes and reports on its next poll
    let (status, _) = poll(
        &app,
        AGENT,
        json!([{ "job_id": job_id, "status": "completed", "payload": {"url": "http://viz/r1"} }]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The caller sees the completed result
    let (status, body) = caller.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["data"], json!({"url": "http://viz/r1"}));
}

/// Scenario C: the agent never polls within the waiter's budget. The
/// caller gets a timeout, the job stays queued, and a later poll still
/// drains it.
#[tokio::test]
async fn timed_out_job_remains_outstanding() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);
    registry.get_or_create(AGENT).await.touch().await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/v1/agents/{}/jobs/clear_checkpoints", AGENT),
        Some(json!({"runs": ["r2"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "timeout");
    assert_eq!(body["method"], "clear_checkpoints");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Lookup by id still finds the created job
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/v1/agents/{}/jobs/{}", AGENT, job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");

    // A later poll still drains it
    let (status, body) = poll(&app, AGENT, json!([])).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn unknown_completion_report_is_accepted_and_invisible() {
    let (hold, wait) = short_policies();
    let (app, _registry) = test_app(hold, wait);

    let bogus = uuid::Uuid::new_v4();
    let (status, body) = poll(
        &app,
        AGENT,
        json!([{ "job_id": bogus, "status": "completed", "payload": {"stale": true} }]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"], json!([]));

    // The ignored report never becomes visible
    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/v1/agents/{}/jobs/{}", AGENT, bogus),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_terminal_report_does_not_complete_the_job() {
    let (hold, wait) = short_policies();
    let (app, registry) = test_app(hold, wait);
    registry.get_or_create(AGENT).await.touch().await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/v1/agents/{}/jobs/call_sync", AGENT),
        Some(json!({"q": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "timeout");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // The agent drains the job, then sends a progress report
    let (_, body) = poll(&app, AGENT, json!([])).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    let (status, _) = poll(
        &app,
        AGENT,
        json!([{ "job_id": job_id, "status": "running", "payload": {"pct": 40} }]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The progress report is not a completion
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/v1/agents/{}/jobs/{}", AGENT, job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");

    // The terminal report is
    poll(
        &app,
        AGENT,
        json!([{ "job_id": job_id, "status": "completed", "payload": {"ok": true} }]),
    )
    .await;
    let (_, body) = request(
        &app,
        "GET",
        &format!("/api/v1/agents/{}/jobs/{}", AGENT, job_id),
        None,
    )
    .await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["data"], json!({"ok": true}));
}

#[tokio::test]
async fn job_lookup_rejects_malformed_job_id() {
    let (hold, wait) = short_policies();
    let (app, _registry) = test_app(hold, wait);

    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/v1/agents/{}/jobs/not-a-uuid", AGENT),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_job_id");
}

#[tokio::test]
async fn agent_status_endpoint() {
    let (hold, wait) = short_policies();
    let (app, _registry) = test_app(hold, wait);

    // Unknown agent
    let (status, body) = request(&app, "GET", &format!("/api/v1/agents/{}", AGENT), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "agent_not_found");

    // After a poll the agent is online with empty queues
    poll(&app, AGENT, json!([])).await;
    let (status, body) = request(&app, "GET", &format!("/api/v1/agents/{}", AGENT), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_id"], AGENT);
    assert_eq!(body["online"], true);
    assert_eq!(body["pending"], 0);
    assert_eq!(body["delivered"], 0);
    assert_eq!(body["completed"], 0);
}
