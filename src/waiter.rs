//! Bounded wait loops that turn asynchronous agent activity into
//! synchronous-looking responses.
//!
//! Both loops re-read current registry state on every iteration (the
//! agent's own poll requests mutate it concurrently) and wake early on
//! the matching notify, but the fixed `WaitPolicy` budget is a hard
//! deadline either way.

use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use crate::config::WaitPolicy;
use crate::dispatch::Job;
use crate::registry::AgentRegistry;

/// Terminal outcome of a result wait. A timeout leaves the job exactly
/// as it is; a late completion is simply never observed by this
/// caller.
#[derive(Debug)]
pub enum WaitOutcome {
    Completed(Job),
    TimedOut,
}

/// Wait for `job_id` to appear in the agent's completed map.
///
/// Returns as soon as the completion lands (early exit), or
/// `TimedOut` once the policy budget elapses, never earlier and never
/// unbounded.
pub async fn await_result(
    registry: &AgentRegistry,
    agent_id: &str,
    job_id: &Uuid,
    policy: WaitPolicy,
) -> WaitOutcome {
    let deadline = Instant::now() + policy.budget();

    loop {
        match registry.get(agent_id).await {
            Some(slot) => {
                // Register for the wakeup before checking, so a
                // completion landing between the check and the await
                // is not missed
                let notified = slot.completion_notified();
                if let Some(job) = slot.completed_job(job_id).await {
                    return WaitOutcome::Completed(job);
                }

                tokio::select! {
                    _ = notified => {}
                    _ = sleep(policy.interval) => {}
                    _ = sleep_until(deadline) => {
                        return final_check(registry, agent_id, job_id).await;
                    }
                }
            }
            // Agent record gone (e.g. swept); the completion cannot
            // arrive, but honor the full budget rather than fail early
            None => {
                tokio::select! {
                    _ = sleep(policy.interval) => {}
                    _ = sleep_until(deadline) => {
                        return final_check(registry, agent_id, job_id).await;
                    }
                }
            }
        }

        if Instant::now() >= deadline {
            return final_check(registry, agent_id, job_id).await;
        }
    }
}

/// One last read-through at the deadline, so a completion that landed
/// exactly on the boundary is still returned.
async fn final_check(registry: &AgentRegistry, agent_id: &str, job_id: &Uuid) -> WaitOutcome {
    if let Some(slot) = registry.get(agent_id).await {
        if let Some(job) = slot.completed_job(job_id).await {
            return WaitOutcome::Completed(job);
        }
    }
    WaitOutcome::TimedOut
}

/// Drain the agent's pending queue, holding the request open on an
/// empty queue up to the policy budget.
///
/// This amortizes agent poll frequency against server load: a job
/// enqueued while the poll is held is delivered immediately via the
/// queue notify instead of on the agent's next poll.
pub async fn hold_for_jobs(
    registry: &AgentRegistry,
    agent_id: &str,
    policy: WaitPolicy,
) -> Vec<Job> {
    let deadline = Instant::now() + policy.budget();

    loop {
        let Some(slot) = registry.get(agent_id).await else {
            return Vec::new();
        };

        let notified = slot.queue_notified();
        let jobs = slot.drain_pending().await;
        if !jobs.is_empty() {
            tracing::info!(agent_id, count = jobs.len(), "Drained pending jobs");
            return jobs;
        }

        tokio::select! {
            _ = notified => {}
            _ = sleep(policy.interval) => {}
            _ = sleep_until(deadline) => {
                // Final drain attempt at the deadline
                let jobs = slot.drain_pending().await;
                if !jobs.is_empty() {
                    tracing::info!(agent_id, count = jobs.len(), "Drained pending jobs");
                }
                return jobs;
            }
        }

        if Instant::now() >= deadline {
            return slot.drain_pending().await;
        }
    }
}
