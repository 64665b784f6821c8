//! Upstream retry engine.
//!
//! This module decides, per logical request, whether a failed upstream
//! attempt should be retried and after what delay. Trigger matching,
//! per-request header overrides, jittered backoff and the cluster retry
//! budget are kept in separate submodules so the router and tests can use
//! them independently.

mod backoff;
mod classify;
pub mod headers;
mod policy;
mod state;

pub use backoff::{JitteredBackoff, RandomSource, SequenceRandom, ThreadRandom};
pub use classify::{would_retry_from_headers, would_retry_from_reset, GrpcStatus, ResetReason};
pub use headers::{parse_status_codes, EffectivePolicy};
pub use policy::{RetryOn, RetryPolicy, DEFAULT_BASE_INTERVAL, DEFAULT_MAX_INTERVAL_FACTOR};
pub use state::{RetryContext, RetryState, RetryStatus};
