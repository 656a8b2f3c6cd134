use std::collections::VecDeque;

use uuid::Uuid;

use crate::dispatch::job::Job;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Ordered queue of undelivered jobs for one agent, oldest first.
#[derive(Debug)]
pub struct PendingQueue {
    jobs: VecDeque<Job>,
    max_jobs: usize,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_jobs,
        }
    }

    /// Append a job. Returns false if the queue is at capacity.
    pub fn push(&mut self, job: Job) -> bool {
        if self.jobs.len() >= self.max_jobs {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    /// Remove and return every queued job in creation order.
    ///
    /// This is the full, non-partial handoff: callers holding the
    /// agent's write lock get every queued job exactly once, so
    /// concurrent drains partition the queue with no overlap.
    pub fn drain_all(&mut self) -> Vec<Job> {
        self.jobs.drain(..).collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    /// Remove a specific job, preserving the order of the rest.
    /// Used when a completion report arrives for a still-queued job.
    pub fn remove(&mut self, id: &Uuid) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.id == *id)?;
        self.jobs.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
