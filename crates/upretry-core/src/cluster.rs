//! Per-cluster retry budget and retry statistics.
//!
//! Every request routed to a cluster shares that cluster's budget, so the
//! number of concurrently outstanding retries stays under the configured
//! maximum regardless of how many requests are failing at once.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Default maximum number of concurrent retries per cluster and priority.
pub const DEFAULT_MAX_RETRIES: u64 = 3;

/// Routing priority; each priority has its own resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourcePriority {
    #[default]
    Default,
    High,
}

/// Shared counter of outstanding retries with admission control.
#[derive(Debug)]
pub struct RetryBudget {
    max: u64,
    in_flight: AtomicU64,
}

impl RetryBudget {
    /// Create a budget allowing `max` concurrent retries. A max of zero
    /// denies every retry.
    pub fn new(max: u64) -> Self {
        Self {
            max,
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of retries currently holding a slot.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Circuit-breaker gauge: 1 while the budget is exhausted, else 0.
    pub fn open(&self) -> u64 {
        u64::from(self.in_flight() >= self.max)
    }

    /// Take one slot. Returns false, leaving the budget untouched, when full.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= self.max {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return a slot taken with `try_acquire`.
    pub fn release(&self) {
        let released = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| n.checked_sub(1));
        if released.is_err() {
            tracing::warn!("retry budget released with no slot held");
        }
    }
}

/// Resource limits for one cluster and priority.
#[derive(Debug)]
pub struct ResourceManager {
    retries: RetryBudget,
}

impl ResourceManager {
    pub fn new(max_retries: u64) -> Self {
        Self {
            retries: RetryBudget::new(max_retries),
        }
    }

    pub fn retries(&self) -> &RetryBudget {
        &self.retries
    }
}

/// Retry counters for a cluster.
#[derive(Debug, Default)]
pub struct ClusterStats {
    upstream_rq_retry: AtomicU64,
    upstream_rq_retry_success: AtomicU64,
    upstream_rq_retry_overflow: AtomicU64,
}

impl ClusterStats {
    /// Retries granted.
    pub fn upstream_rq_retry(&self) -> u64 {
        self.upstream_rq_retry.load(Ordering::Relaxed)
    }

    /// Retried attempts that finished without needing another retry.
    pub fn upstream_rq_retry_success(&self) -> u64 {
        self.upstream_rq_retry_success.load(Ordering::Relaxed)
    }

    /// Retries denied because the budget was exhausted.
    pub fn upstream_rq_retry_overflow(&self) -> u64 {
        self.upstream_rq_retry_overflow.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_retry(&self) {
        self.upstream_rq_retry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retry_success(&self) {
        self.upstream_rq_retry_success.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retry_overflow(&self) {
        self.upstream_rq_retry_overflow.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a cluster's retry counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStatsSnapshot {
    pub cluster: String,
    pub upstream_rq_retry: u64,
    pub upstream_rq_retry_success: u64,
    pub upstream_rq_retry_overflow: u64,
    pub rq_retry_open: u64,
    pub rq_retry_open_high: u64,
    pub retries_in_flight: u64,
}

/// Shared state for one upstream cluster.
#[derive(Debug)]
pub struct ClusterInfo {
    name: String,
    stats: ClusterStats,
    default_priority: ResourceManager,
    high_priority: ResourceManager,
}

impl ClusterInfo {
    /// Create a cluster with per-priority retry limits.
    pub fn new(name: impl Into<String>, max_retries: u64, max_retries_high: u64) -> Self {
        Self {
            name: name.into(),
            stats: ClusterStats::default(),
            default_priority: ResourceManager::new(max_retries),
            high_priority: ResourceManager::new(max_retries_high),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    pub fn resource_manager(&self, priority: ResourcePriority) -> &ResourceManager {
        match priority {
            ResourcePriority::Default => &self.default_priority,
            ResourcePriority::High => &self.high_priority,
        }
    }

    pub fn snapshot(&self) -> ClusterStatsSnapshot {
        let default = self.default_priority.retries();
        let high = self.high_priority.retries();
        ClusterStatsSnapshot {
            cluster: self.name.clone(),
            upstream_rq_retry: self.stats.upstream_rq_retry(),
            upstream_rq_retry_success: self.stats.upstream_rq_retry_success(),
            upstream_rq_retry_overflow: self.stats.upstream_rq_retry_overflow(),
            rq_retry_open: default.open(),
            rq_retry_open_high: high.open(),
            retries_in_flight: default.in_flight() + high.in_flight(),
        }
    }
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self::new("default", DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRIES)
    }
}
