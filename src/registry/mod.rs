use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::dispatch::job::Job;
use crate::dispatch::queue::PendingQueue;
use crate::error::{CourierError, Result};

/// Minimum length of an agent id. Shorter ids are malformed input,
/// rejected before any state is created.
pub const MIN_AGENT_ID_LEN: usize = 10;

/// One completion report from an agent's poll body.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub job_id: Uuid,
    pub payload: Value,
}

/// Per-agent mutable state. Always accessed through the slot's lock;
/// a single writer per agent makes every queue drain and completion
/// insert linearizable with respect to each other.
#[derive(Debug, Default)]
pub struct AgentState {
    /// None until the agent's first poll
    last_seen: Option<Instant>,
    pending: PendingQueue,
    /// Jobs handed out by a drain and not yet reported complete.
    /// Kept so a later completion report or lookup can still find them.
    delivered: HashMap<Uuid, Job>,
    completed: HashMap<Uuid, Job>,
}

/// Shared handle to one agent's state plus its wakeup primitives.
///
/// `queue_notify` wakes a poll request held open on an empty queue as
/// soon as a job is enqueued; `completion_notify` wakes result waiters
/// as soon as a completion report lands. Waiters still enforce their
/// own hard deadline, the notifies only cut the latency of the
/// fixed-interval re-check.
#[derive(Debug, Default)]
pub struct AgentSlot {
    state: RwLock<AgentState>,
    queue_notify: Notify,
    completion_notify: Notify,
}

impl AgentSlot {
    /// Record a poll contact. Online status is derived from this, there
    /// is no separate heartbeat channel.
    pub async fn touch(&self) {
        self.state.write().await.last_seen = Some(Instant::now());
    }

    /// Derived, time-decaying online check. Never set directly.
    pub async fn is_online(&self, freshness: Duration) -> bool {
        let state = self.state.read().await;
        match state.last_seen {
            Some(seen) => seen.elapsed() < freshness,
            None => false,
        }
    }

    /// Append a job to the pending queue and wake any held-open poll.
    /// Returns false if the queue is at capacity.
    pub async fn enqueue(&self, job: Job) -> bool {
        let pushed = self.state.write().await.pending.push(job);
        if pushed {
            self.queue_notify.notify_waiters();
        }
        pushed
    }

    /// Apply completion reports from a poll body, in order.
    ///
    /// A report whose job id is known (handed out earlier, or still
    /// queued) marks the job completed and moves it into the completed
    /// map. Unknown job ids are ignored without error: results can
    /// legitimately arrive after the job's bookkeeping was lost.
    pub async fn record_completions(&self, reports: Vec<CompletionReport>) {
        if reports.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        let mut applied = false;
        for report in reports {
            let job = match state.delivered.remove(&report.job_id) {
                Some(job) => Some(job),
                None => state.pending.remove(&report.job_id),
            };

            match job {
                Some(mut job) => {
                    job.complete(report.payload);
                    tracing::debug!(job_id = %job.id, method = %job.method, "Job completed");
                    state.completed.insert(job.id, job);
                    applied = true;
                }
                None => {
                    tracing::warn!(job_id = %report.job_id, "Ignoring completion report for unknown job");
                }
            }
        }
        drop(state);

        if applied {
            self.completion_notify.notify_waiters();
        }
    }

    /// Atomically remove and return every queued job, oldest first.
    ///
    /// Drained jobs move to the delivered map in the same critical
    /// section, so two concurrent drains partition the queue and a
    /// drained id never reappears in a later drain.
    pub async fn drain_pending(&self) -> Vec<Job> {
        let mut state = self.state.write().await;
        let jobs = state.pending.drain_all();
        for job in &jobs {
            state.delivered.insert(job.id, job.clone());
        }
        jobs
    }

    /// Read-through lookup of the completed map. Each waiter iteration
    /// calls this afresh; state is mutated concurrently by the agent's
    /// own poll requests.
    pub async fn completed_job(&self, job_id: &Uuid) -> Option<Job> {
        self.state.read().await.completed.get(job_id).cloned()
    }

    /// Find a job in any of the three holding areas.
    pub async fn find_job(&self, job_id: &Uuid) -> Option<Job> {
        let state = self.state.read().await;
        state
            .completed
            .get(job_id)
            .or_else(|| state.delivered.get(job_id))
            .or_else(|| state.pending.get(job_id))
            .cloned()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Wait for the next enqueue notification. Register the future
    /// before re-checking state to avoid missing a wakeup.
    pub fn queue_notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.queue_notify.notified()
    }

    pub fn completion_notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.completion_notify.notified()
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        let state = self.state.read().await;
        AgentSnapshot {
            online_for: state.last_seen.map(|seen| seen.elapsed()),
            pending: state.pending.len(),
            delivered: state.delivered.len(),
            completed: state.completed.len(),
        }
    }

    /// Drop completed jobs older than the TTL. Pending and delivered
    /// jobs are never pruned. Returns the number removed.
    async fn sweep_completed(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            // TTL too large to represent; nothing can be old enough
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let mut state = self.state.write().await;
        let before = state.completed.len();
        state
            .completed
            .retain(|_, job| job.completed_at.map(|at| at > cutoff).unwrap_or(true));
        before - state.completed.len()
    }

    /// True if this record can be dropped entirely: idle past the TTL
    /// with no pending or delivered work outstanding.
    async fn is_expired(&self, idle_ttl: Duration) -> bool {
        let state = self.state.read().await;
        let idle = match state.last_seen {
            Some(seen) => seen.elapsed() > idle_ttl,
            // Never polled; expire once nothing references it
            None => true,
        };
        idle && state.pending.is_empty() && state.delivered.is_empty() && state.completed.is_empty()
    }
}

/// Point-in-time view of one agent, for the status endpoint.
#[derive(Debug)]
pub struct AgentSnapshot {
    /// Time since the agent's last poll, None if it never polled
    pub online_for: Option<Duration>,
    pub pending: usize,
    pub delivered: usize,
    pub completed: usize,
}

/// Tracks every known agent. Each agent's state is private to its
/// slot; different agents are fully independent and are processed in
/// parallel with no cross-agent locking.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentSlot>>>,
    freshness: Duration,
}

impl AgentRegistry {
    pub fn new(freshness: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            freshness,
        }
    }

    /// Format precondition on agent ids, checked before any state
    /// mutation.
    pub fn validate_agent_id(agent_id: &str) -> Result<()> {
        if agent_id.len() < MIN_AGENT_ID_LEN {
            return Err(CourierError::InvalidAgentId(agent_id.to_string()));
        }
        Ok(())
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Get or create the agent's slot. Records are created on first
    /// contact (dispatch or poll) and only removed by the retention
    /// sweeper.
    pub async fn get_or_create(&self, agent_id: &str) -> Arc<AgentSlot> {
        {
            let agents = self.agents.read().await;
            if let Some(slot) = agents.get(agent_id) {
                return slot.clone();
            }
        }

        let mut agents = self.agents.write().await;
        agents
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                tracing::info!(agent_id, "Agent registered");
                Arc::new(AgentSlot::default())
            })
            .clone()
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentSlot>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn is_online(&self, agent_id: &str) -> bool {
        match self.get(agent_id).await {
            Some(slot) => slot.is_online(self.freshness).await,
            None => false,
        }
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// One retention pass: prune expired completed jobs, then drop
    /// agent records that are idle and hold no state.
    pub async fn sweep(&self, retention: &RetentionConfig) -> (usize, usize) {
        let slots: Vec<(String, Arc<AgentSlot>)> = {
            let agents = self.agents.read().await;
            agents
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        let mut jobs_removed = 0;
        let mut expired = Vec::new();
        for (agent_id, slot) in &slots {
            jobs_removed += slot.sweep_completed(retention.completed_ttl).await;
            if slot.is_expired(retention.agent_idle_ttl).await {
                expired.push(agent_id.clone());
            }
        }

        let mut agents_removed = 0;
        if !expired.is_empty() {
            let mut agents = self.agents.write().await;
            for agent_id in expired {
                // Re-check under the map write lock: the agent may have
                // polled or received work since the candidate pass, and
                // removing it then would drop a live queue
                let still_expired = match agents.get(&agent_id) {
                    Some(slot) => slot.is_expired(retention.agent_idle_ttl).await,
                    None => false,
                };
                if still_expired && agents.remove(&agent_id).is_some() {
                    tracing::info!(%agent_id, "Idle agent expired");
                    agents_removed += 1;
                }
            }
        }

        (jobs_removed, agents_removed)
    }

    /// Background retention loop. Runs until cancelled.
    pub async fn run_sweeper(
        self: Arc<Self>,
        retention: RetentionConfig,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        if !retention.is_enabled() {
            tracing::info!("Retention sweeper disabled");
            return;
        }

        let mut interval = tokio::time::interval(retention.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (jobs, agents) = self.sweep(&retention).await;
                    if jobs > 0 || agents > 0 {
                        tracing::info!(jobs, agents, "Retention sweep removed state");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Retention sweeper stopped");
                    break;
                }
            }
        }
    }
}
