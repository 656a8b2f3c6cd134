use std::net::SocketAddr;
use std::time::Duration;

/// Schedule for a bounded re-check wait loop.
///
/// Both the poll endpoint's empty-queue hold and the result waiter use
/// the same shape: up to `max_attempts` checks spaced by `interval`,
/// for a hard total budget of `interval * max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    /// Time between re-checks of the shared state
    pub interval: Duration,
    /// Number of checks before giving up
    pub max_attempts: u32,
}

impl WaitPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Schedule for job-request endpoints waiting on a remote execution
    /// round trip: 15 checks every 2s, 30s total.
    pub fn sync() -> Self {
        Self::new(Duration::from_secs(2), 15)
    }

    /// Schedule for holding an empty poll open: 16 checks every 3s,
    /// 48s total.
    pub fn delivery() -> Self {
        Self::new(Duration::from_secs(3), 16)
    }

    /// Total time budget of this policy.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Retention policy for terminal state.
///
/// The dispatch protocol itself never garbage-collects: completed jobs
/// and idle agent records would grow forever. A background sweeper
/// prunes them on `sweep_interval`. Pending and delivered jobs are
/// never pruned.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// Drop completed jobs older than this
    pub completed_ttl: Duration,
    /// Drop agent records that have not polled for this long
    pub agent_idle_ttl: Duration,
    /// How often the sweeper runs. Zero disables sweeping.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_ttl: Duration::from_secs(3600),
            agent_idle_ttl: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        !self.sweep_interval.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// An agent is online iff it polled within this window
    pub freshness: Duration,
    /// Empty-queue hold schedule for the poll endpoint
    pub hold: WaitPolicy,
    /// Completion wait schedule for job-request endpoints
    pub wait: WaitPolicy,
    pub retention: RetentionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8600"
                .parse()
                .expect("default listen address is valid"),
            freshness: Duration::from_secs(60),
            hold: WaitPolicy::delivery(),
            wait: WaitPolicy::sync(),
            retention: RetentionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_hold(mut self, hold: WaitPolicy) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}
