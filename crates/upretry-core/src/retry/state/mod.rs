//! Retry decisions for one logical upstream request.

use std::sync::Arc;

use http::{HeaderMap, Response};

use crate::cluster::{ClusterInfo, ResourcePriority, RetryBudget};
use crate::runtime::{Runtime, USE_RETRY};
use crate::timer::RetryTimer;

use super::backoff::{JitteredBackoff, RandomSource};
use super::classify::{would_retry_from_headers, would_retry_from_reset, ResetReason};
use super::headers::EffectivePolicy;
use super::policy::RetryPolicy;


/// Outcome of consulting the retry state after an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// A retry was granted and the timer is armed.
    Yes,
    /// The signal is not retryable (or retries are switched off).
    No,
    /// Retryable, but the cluster retry budget is exhausted.
    NoOverflow,
    /// Retryable, but this request has used all of its retries.
    NoRetryLimitExceeded,
}

/// Collaborators a retry state needs besides the policy.
pub struct RetryContext<'a> {
    pub cluster: Arc<ClusterInfo>,
    pub priority: ResourcePriority,
    pub runtime: &'a Runtime,
    pub random: Box<dyn RandomSource>,
    pub timer: Box<dyn RetryTimer>,
}

/// Per-request retry state.
///
/// Created with [`RetryState::create`], which returns `None` when no
/// trigger applies to the request. Each failure of an upstream attempt is
/// reported through [`should_retry_reset`](Self::should_retry_reset) or
/// [`should_retry_headers`](Self::should_retry_headers); on
/// [`RetryStatus::Yes`] the supplied callback runs once the backoff elapses.
///
/// A granted retry holds one slot of the cluster retry budget until the next
/// decision or until the state is dropped. Dropping the state cancels a
/// pending callback.
pub struct RetryState {
    policy: EffectivePolicy,
    retries_remaining: u32,
    retries_enabled: bool,
    cluster: Arc<ClusterInfo>,
    priority: ResourcePriority,
    backoff: JitteredBackoff,
    timer: Box<dyn RetryTimer>,
    retry_in_flight: bool,
}

impl RetryState {
    /// Resolve `policy` against the request's override headers (stripping
    /// them) and build the state, or `None` if the effective trigger set is
    /// empty.
    pub fn create(
        policy: &RetryPolicy,
        request_headers: &mut HeaderMap,
        ctx: RetryContext<'_>,
    ) -> Option<Self> {
        let policy = EffectivePolicy::resolve(policy, request_headers);
        if policy.retry_on.is_empty() {
            return None;
        }

        let RetryContext {
            cluster,
            priority,
            runtime,
            mut random,
            timer,
        } = ctx;
        let retries_enabled = runtime.feature_enabled(USE_RETRY, 100, &mut *random);
        let backoff = JitteredBackoff::new(policy.base_interval, policy.max_interval, random);

        tracing::debug!(
            cluster = cluster.name(),
            retry_on = %policy.retry_on,
            max_retries = policy.max_retries,
            retries_enabled,
            "retry state created"
        );

        Some(Self {
            retries_remaining: policy.max_retries,
            policy,
            retries_enabled,
            cluster,
            priority,
            backoff,
            timer,
            retry_in_flight: false,
        })
    }

    /// True for every constructed state: the trigger set is non-empty.
    /// Independent of the runtime retry switch.
    pub fn enabled(&self) -> bool {
        !self.policy.retry_on.is_empty()
    }

    pub fn policy(&self) -> &EffectivePolicy {
        &self.policy
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Host selection attempts the load balancer may make per attempt.
    pub fn host_selection_max_attempts(&self) -> u32 {
        self.policy.host_selection_max_attempts
    }

    /// Decide whether to retry after the upstream stream was reset.
    pub fn should_retry_reset<F>(&mut self, reason: ResetReason, callback: F) -> RetryStatus
    where
        F: FnOnce() + Send + 'static,
    {
        let would_retry = would_retry_from_reset(self.policy.retry_on, reason);
        let status = self.should_retry(would_retry, callback);
        tracing::debug!(cluster = self.cluster.name(), %reason, ?status, "reset retry decision");
        status
    }

    /// Decide whether to retry after receiving upstream response headers.
    pub fn should_retry_headers<B, F>(&mut self, response: &Response<B>, callback: F) -> RetryStatus
    where
        F: FnOnce() + Send + 'static,
    {
        let would_retry = would_retry_from_headers(
            self.policy.retry_on,
            &self.policy.retriable_status_codes,
            response,
        );
        let status = self.should_retry(would_retry, callback);
        tracing::debug!(
            cluster = self.cluster.name(),
            status_code = response.status().as_u16(),
            ?status,
            "response retry decision"
        );
        status
    }

    fn budget(&self) -> &RetryBudget {
        self.cluster.resource_manager(self.priority).retries()
    }

    fn should_retry<F>(&mut self, would_retry: bool, callback: F) -> RetryStatus
    where
        F: FnOnce() + Send + 'static,
    {
        // A retry was outstanding and its attempt needs no further retry.
        if self.retry_in_flight && !would_retry {
            self.cluster.stats().inc_retry_success();
        }
        self.reset_retry();

        if !would_retry {
            return RetryStatus::No;
        }
        if self.retries_remaining == 0 {
            return RetryStatus::NoRetryLimitExceeded;
        }
        if !self.retries_enabled {
            return RetryStatus::No;
        }
        if !self.budget().try_acquire() {
            self.cluster.stats().inc_retry_overflow();
            return RetryStatus::NoOverflow;
        }

        self.retries_remaining -= 1;
        self.retry_in_flight = true;
        self.cluster.stats().inc_retry();

        let delay = self.backoff.next_backoff();
        tracing::trace!(delay_ms = delay.as_millis() as u64, "arming retry timer");
        self.timer.arm(delay, Box::new(callback));
        RetryStatus::Yes
    }

    /// Cancel any pending callback and give back the budget slot held by
    /// the previous grant.
    fn reset_retry(&mut self) {
        self.timer.disarm();
        if self.retry_in_flight {
            self.budget().release();
            self.retry_in_flight = false;
        }
    }
}

impl Drop for RetryState {
    fn drop(&mut self) {
        self.reset_retry();
    }
}

impl std::fmt::Debug for RetryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryState")
            .field("cluster", &self.cluster.name())
            .field("policy", &self.policy)
            .field("retries_remaining", &self.retries_remaining)
            .field("retries_enabled", &self.retries_enabled)
            .field("retry_in_flight", &self.retry_in_flight)
            .finish_non_exhaustive()
    }
}
