//! Parameters shared by reachability, fusion and reconciliation.

use std::time::Duration;

use crate::reachability::ReachabilityMode;

/// Tuning for the fusion subsystem.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// A peer is in direct comm if heard from within this window.
    /// Also the relay margin for entries relayed through a third party.
    pub comm_threshold: Duration,

    /// Relayed entries are ignored until this long after startup.
    pub startup_grace: Duration,

    /// Slack when comparing relayed timestamps against base freshness.
    pub base_relay_grace: Duration,

    /// Which reachability strategy to run.
    pub mode: ReachabilityMode,

    /// Running without a base station; the base is always considered in comm.
    pub solo: bool,

    /// Deadline for one fragment request.
    pub request_timeout: Duration,

    /// Maximum fragment requests in flight at once.
    pub reconcile_concurrency: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            comm_threshold: Duration::from_secs(2),
            startup_grace: Duration::ZERO,
            base_relay_grace: Duration::from_secs(1),
            mode: ReachabilityMode::Timeout,
            solo: false,
            request_timeout: Duration::from_secs(1),
            reconcile_concurrency: 1,
        }
    }
}

impl FusionConfig {
    /// Set the direct-comm window.
    #[must_use]
    pub fn with_comm_threshold(mut self, threshold: Duration) -> Self {
        self.comm_threshold = threshold;
        self
    }

    /// Set the startup grace period.
    #[must_use]
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Select the reachability strategy.
    #[must_use]
    pub fn with_mode(mut self, mode: ReachabilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run without a base station.
    #[must_use]
    pub fn with_solo(mut self, solo: bool) -> Self {
        self.solo = solo;
        self
    }

    /// Set the fragment request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound the number of concurrent fragment requests (at least one).
    #[must_use]
    pub fn with_reconcile_concurrency(mut self, concurrency: usize) -> Self {
        self.reconcile_concurrency = concurrency.max(1);
        self
    }
}
