use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use crate::error::PolicyError;

/// Default base interval for jittered backoff.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(25);

/// Max interval defaults to this multiple of the base interval.
pub const DEFAULT_MAX_INTERVAL_FACTOR: u32 = 10;

/// Set of retry triggers. A failure signal is retryable when it matches any
/// trigger in the set.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RetryOn(u32);

impl RetryOn {
    pub const FIVE_XX: RetryOn = RetryOn(1 << 0);
    pub const GATEWAY_ERROR: RetryOn = RetryOn(1 << 1);
    pub const CONNECT_FAILURE: RetryOn = RetryOn(1 << 2);
    pub const RETRIABLE_4XX: RetryOn = RetryOn(1 << 3);
    pub const REFUSED_STREAM: RetryOn = RetryOn(1 << 4);
    pub const RETRIABLE_STATUS_CODES: RetryOn = RetryOn(1 << 5);
    pub const RESET: RetryOn = RetryOn(1 << 6);
    pub const GRPC_CANCELLED: RetryOn = RetryOn(1 << 7);
    pub const GRPC_DEADLINE_EXCEEDED: RetryOn = RetryOn(1 << 8);
    pub const GRPC_RESOURCE_EXHAUSTED: RetryOn = RetryOn(1 << 9);
    pub const GRPC_UNAVAILABLE: RetryOn = RetryOn(1 << 10);
    pub const GRPC_INTERNAL: RetryOn = RetryOn(1 << 11);

    pub const fn empty() -> Self {
        RetryOn(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every trigger in `other` is also in `self`.
    pub const fn contains(self, other: RetryOn) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share at least one trigger.
    pub const fn intersects(self, other: RetryOn) -> bool {
        self.0 & other.0 != 0
    }

    /// Look up an HTTP trigger name as used by `x-envoy-retry-on`.
    pub fn from_http_name(name: &str) -> Option<Self> {
        lookup(HTTP_TRIGGERS, name)
    }

    /// Look up a gRPC trigger name as used by `x-envoy-retry-grpc-on`.
    pub fn from_grpc_name(name: &str) -> Option<Self> {
        lookup(GRPC_TRIGGERS, name)
    }

    /// Parse a comma-separated `x-envoy-retry-on` header value. Unknown names are ignored.
    pub fn parse_http_header(value: &str) -> Self {
        parse_lenient(value, Self::from_http_name)
    }

    /// Parse a comma-separated `x-envoy-retry-grpc-on` header value. Unknown names are ignored.
    pub fn parse_grpc_header(value: &str) -> Self {
        parse_lenient(value, Self::from_grpc_name)
    }

    /// Parse a configured trigger list, accepting both HTTP and gRPC names.
    /// Unlike the header parsers, an unknown name is an error.
    pub fn parse_config(value: &str) -> Result<Self, PolicyError> {
        let mut out = RetryOn::empty();
        for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let trigger = Self::from_http_name(name)
                .or_else(|| Self::from_grpc_name(name))
                .ok_or_else(|| PolicyError::UnknownTrigger(name.to_string()))?;
            out |= trigger;
        }
        Ok(out)
    }

    /// Names of the triggers in this set, HTTP triggers first.
    pub fn names(self) -> Vec<&'static str> {
        HTTP_TRIGGERS
            .iter()
            .chain(GRPC_TRIGGERS)
            .filter(|(_, t)| self.contains(*t))
            .map(|(name, _)| *name)
            .collect()
    }
}

const HTTP_TRIGGERS: &[(&str, RetryOn)] = &[
    ("5xx", RetryOn::FIVE_XX),
    ("gateway-error", RetryOn::GATEWAY_ERROR),
    ("connect-failure", RetryOn::CONNECT_FAILURE),
    ("retriable-4xx", RetryOn::RETRIABLE_4XX),
    ("refused-stream", RetryOn::REFUSED_STREAM),
    ("retriable-status-codes", RetryOn::RETRIABLE_STATUS_CODES),
    ("reset", RetryOn::RESET),
];

const GRPC_TRIGGERS: &[(&str, RetryOn)] = &[
    ("cancelled", RetryOn::GRPC_CANCELLED),
    ("deadline-exceeded", RetryOn::GRPC_DEADLINE_EXCEEDED),
    ("resource-exhausted", RetryOn::GRPC_RESOURCE_EXHAUSTED),
    ("unavailable", RetryOn::GRPC_UNAVAILABLE),
    ("internal", RetryOn::GRPC_INTERNAL),
];

fn lookup(table: &[(&str, RetryOn)], name: &str) -> Option<RetryOn> {
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, trigger)| *trigger)
}

fn parse_lenient(value: &str, f: fn(&str) -> Option<RetryOn>) -> RetryOn {
    value
        .split(',')
        .filter_map(|name| f(name.trim()))
        .fold(RetryOn::empty(), |acc, t| acc | t)
}

impl BitOr for RetryOn {
    type Output = RetryOn;

    fn bitor(self, rhs: RetryOn) -> RetryOn {
        RetryOn(self.0 | rhs.0)
    }
}

impl BitOrAssign for RetryOn {
    fn bitor_assign(&mut self, rhs: RetryOn) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl fmt::Display for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

/// Route-level retry policy, before any per-request header overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Triggers that make a failure retryable.
    pub retry_on: RetryOn,
    /// Maximum number of retries (not counting the first attempt).
    pub num_retries: u32,
    /// Backoff base interval; `None` means 25ms.
    pub base_interval: Option<Duration>,
    /// Backoff cap; `None` means 10x the base interval.
    pub max_interval: Option<Duration>,
    /// Extra status codes matched by the `retriable-status-codes` trigger.
    pub retriable_status_codes: Vec<u16>,
    /// Host selection attempts the load balancer may make per retry.
    pub host_selection_max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_on: RetryOn::empty(),
            num_retries: 1,
            base_interval: None,
            max_interval: None,
            retriable_status_codes: Vec::new(),
            host_selection_max_attempts: 1,
        }
    }
}

impl RetryPolicy {
    /// Effective base interval.
    pub fn base_interval(&self) -> Duration {
        self.base_interval.unwrap_or(DEFAULT_BASE_INTERVAL)
    }

    /// Effective max interval.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
            .unwrap_or_else(|| self.base_interval() * DEFAULT_MAX_INTERVAL_FACTOR)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let base_ms = self.base_interval().as_millis() as u64;
        let max_ms = self.max_interval().as_millis() as u64;
        if base_ms == 0 {
            return Err(PolicyError::ZeroBaseInterval);
        }
        if max_ms < base_ms {
            return Err(PolicyError::InvertedIntervals { base_ms, max_ms });
        }
        if let Some(code) = self
            .retriable_status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(PolicyError::InvalidStatusCode(*code));
        }
        Ok(())
    }
}
