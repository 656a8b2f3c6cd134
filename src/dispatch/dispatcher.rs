use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::job::{Job, JobMethod};
use crate::registry::AgentRegistry;

/// Outcome of a job-creation attempt.
///
/// Offline is a terminal status, not an error: an agent that will
/// never poll must be reported to the caller immediately instead of
/// leaving an orphaned job behind.
#[derive(Debug)]
pub enum DispatchOutcome {
    Created(Job),
    Offline,
}

impl DispatchOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            DispatchOutcome::Created(job) => Some(job),
            DispatchOutcome::Offline => None,
        }
    }
}

/// Creates jobs and enqueues them for a target agent.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Create a job for an agent and append it to the agent's pending
    /// queue. A local enqueue only; delivery happens on the agent's
    /// next poll.
    ///
    /// If the agent is not online no job is created and the queue is
    /// left untouched.
    pub async fn create_job(
        &self,
        agent_id: &str,
        method: JobMethod,
        payload: Value,
    ) -> DispatchOutcome {
        let slot = self.registry.get_or_create(agent_id).await;

        if !slot.is_online(self.registry.freshness()).await {
            tracing::debug!(agent_id, %method, "Agent offline, refusing job");
            return DispatchOutcome::Offline;
        }

        let job = Job::new(method, payload);
        if !slot.enqueue(job.clone()).await {
            // Queue at capacity: treat like an unreachable agent rather
            // than growing without bound
            tracing::warn!(agent_id, %method, "Pending queue at capacity, refusing job");
            return DispatchOutcome::Offline;
        }

        tracing::info!(agent_id, job_id = %job.id, %method, "Job created");
        DispatchOutcome::Created(job)
    }
}
