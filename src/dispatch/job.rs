use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CourierError;

/// Operation kinds an agent knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMethod {
    LaunchVisualizer,
    ClearCheckpoints,
    CallSync,
}

impl std::fmt::Display for JobMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMethod::LaunchVisualizer => write!(f, "launch_visualizer"),
            JobMethod::ClearCheckpoints => write!(f, "clear_checkpoints"),
            JobMethod::CallSync => write!(f, "call_sync"),
        }
    }
}

impl std::str::FromStr for JobMethod {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launch_visualizer" => Ok(JobMethod::LaunchVisualizer),
            "clear_checkpoints" => Ok(JobMethod::ClearCheckpoints),
            "call_sync" => Ok(JobMethod::CallSync),
            other => Err(CourierError::UnknownMethod(other.to_string())),
        }
    }
}

/// There is no explicit delivered/acked state: a job is either still
/// queued (or handed out) or completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "created"),
            JobStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One unit of remote work. Immutable once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub method: JobMethod,
    pub payload: Value,
    pub status: JobStatus,
    pub response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(method: JobMethod, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            payload,
            status: JobStatus::Created,
            response: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark the job completed with the agent's response payload.
    pub fn complete(&mut self, response: Value) {
        self.status = JobStatus::Completed;
        self.response = Some(response);
        self.completed_at = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
