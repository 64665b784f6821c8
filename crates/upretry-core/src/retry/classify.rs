//! Match upstream failure signals (stream resets and response headers)
//! against a trigger set.

use std::fmt;

use http::{HeaderMap, Response, StatusCode};

use super::headers::{GRPC_STATUS, OVERLOADED, RATE_LIMITED};
use super::policy::RetryOn;

/// Why an upstream stream ended before a complete response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetReason {
    /// Local side reset the stream.
    LocalReset,
    /// Local side refused the stream (e.g. connection-level limits).
    LocalRefusedStreamReset,
    /// The connection to the upstream host could not be established.
    ConnectionFailure,
    /// The connection was terminated after being established.
    ConnectionTermination,
    /// Stream could not be created because the upstream is overloaded.
    Overflow,
    /// Remote side reset the stream.
    RemoteReset,
    /// Remote side refused the stream before processing it.
    RemoteRefusedStreamReset,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResetReason::LocalReset => "local reset",
            ResetReason::LocalRefusedStreamReset => "local refused stream reset",
            ResetReason::ConnectionFailure => "connection failure",
            ResetReason::ConnectionTermination => "connection termination",
            ResetReason::Overflow => "overflow",
            ResetReason::RemoteReset => "remote reset",
            ResetReason::RemoteRefusedStreamReset => "remote refused stream reset",
        };
        f.write_str(s)
    }
}

/// gRPC status codes that have a matching retry trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcStatus {
    Cancelled = 1,
    DeadlineExceeded = 4,
    ResourceExhausted = 8,
    Internal = 13,
    Unavailable = 14,
}

impl GrpcStatus {
    /// Parse a `grpc-status` header value. Codes without a trigger map to `None`.
    pub fn from_header(headers: &HeaderMap) -> Option<Self> {
        let code: u32 = headers.get(&GRPC_STATUS)?.to_str().ok()?.trim().parse().ok()?;
        match code {
            1 => Some(GrpcStatus::Cancelled),
            4 => Some(GrpcStatus::DeadlineExceeded),
            8 => Some(GrpcStatus::ResourceExhausted),
            13 => Some(GrpcStatus::Internal),
            14 => Some(GrpcStatus::Unavailable),
            _ => None,
        }
    }

    fn trigger(self) -> RetryOn {
        match self {
            GrpcStatus::Cancelled => RetryOn::GRPC_CANCELLED,
            GrpcStatus::DeadlineExceeded => RetryOn::GRPC_DEADLINE_EXCEEDED,
            GrpcStatus::ResourceExhausted => RetryOn::GRPC_RESOURCE_EXHAUSTED,
            GrpcStatus::Internal => RetryOn::GRPC_INTERNAL,
            GrpcStatus::Unavailable => RetryOn::GRPC_UNAVAILABLE,
        }
    }
}

/// Whether `reason` is retryable under `retry_on`.
pub fn would_retry_from_reset(retry_on: RetryOn, reason: ResetReason) -> bool {
    // Overflow means the upstream refused the work outright.
    if reason == ResetReason::Overflow {
        return false;
    }
    // A reset surfaces to the client as a 5xx, so the 5xx class triggers
    // cover it alongside the dedicated reset trigger.
    if retry_on.intersects(RetryOn::RESET | RetryOn::FIVE_XX | RetryOn::GATEWAY_ERROR) {
        return true;
    }
    if retry_on.contains(RetryOn::REFUSED_STREAM) && reason == ResetReason::RemoteRefusedStreamReset
    {
        return true;
    }
    retry_on.contains(RetryOn::CONNECT_FAILURE) && reason == ResetReason::ConnectionFailure
}

/// Whether a response with these headers is retryable under `retry_on`.
///
/// `retriable_status_codes` is consulted only for the
/// `retriable-status-codes` trigger.
pub fn would_retry_from_headers<B>(
    retry_on: RetryOn,
    retriable_status_codes: &[u16],
    response: &Response<B>,
) -> bool {
    let headers = response.headers();
    if headers.contains_key(&OVERLOADED) || headers.contains_key(&RATE_LIMITED) {
        return false;
    }

    let status = response.status();
    if retry_on.contains(RetryOn::FIVE_XX) && status.is_server_error() {
        return true;
    }
    if retry_on.contains(RetryOn::GATEWAY_ERROR) && is_gateway_error(status) {
        return true;
    }
    if retry_on.contains(RetryOn::RETRIABLE_4XX) && status == StatusCode::CONFLICT {
        return true;
    }
    if retry_on.contains(RetryOn::RETRIABLE_STATUS_CODES)
        && retriable_status_codes.contains(&status.as_u16())
    {
        return true;
    }

    GrpcStatus::from_header(headers).is_some_and(|s| retry_on.contains(s.trigger()))
}

fn is_gateway_error(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}
