//! Per-request retry overrides carried in `x-envoy-*` request headers.
//!
//! Overrides are resolved exactly once, when the retry state is created, into
//! an immutable [`EffectivePolicy`]. The override headers are then stripped so
//! the upstream never sees them.

use std::time::Duration;

use http::header::{HeaderMap, HeaderName};

use super::policy::{RetryOn, RetryPolicy};

pub const RETRY_ON: HeaderName = HeaderName::from_static("x-envoy-retry-on");
pub const RETRY_GRPC_ON: HeaderName = HeaderName::from_static("x-envoy-retry-grpc-on");
pub const MAX_RETRIES: HeaderName = HeaderName::from_static("x-envoy-max-retries");
pub const RETRIABLE_STATUS_CODES: HeaderName =
    HeaderName::from_static("x-envoy-retriable-status-codes");

/// Response marker: upstream shed the request due to overload.
pub const OVERLOADED: HeaderName = HeaderName::from_static("x-envoy-overloaded");
/// Response marker: the request was rate limited.
pub const RATE_LIMITED: HeaderName = HeaderName::from_static("x-envoy-ratelimited");
pub const GRPC_STATUS: HeaderName = HeaderName::from_static("grpc-status");

/// Retry policy after request-header overrides have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub retry_on: RetryOn,
    pub max_retries: u32,
    pub retriable_status_codes: Vec<u16>,
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub host_selection_max_attempts: u32,
}

impl EffectivePolicy {
    /// Apply request-header overrides on top of `policy` and remove the
    /// override headers from `request_headers`.
    ///
    /// A present trigger header replaces the configured triggers (the two
    /// trigger headers are unioned with each other, never with the policy).
    /// Malformed max-retries or status-code headers leave the policy value.
    pub fn resolve(policy: &RetryPolicy, request_headers: &mut HeaderMap) -> Self {
        let http_on = take_str(request_headers, &RETRY_ON);
        let grpc_on = take_str(request_headers, &RETRY_GRPC_ON);
        let max_retries = take_str(request_headers, &MAX_RETRIES);
        let status_codes = take_str(request_headers, &RETRIABLE_STATUS_CODES);

        let retry_on = if http_on.is_some() || grpc_on.is_some() {
            let http = http_on.as_deref().map_or(RetryOn::empty(), RetryOn::parse_http_header);
            let grpc = grpc_on.as_deref().map_or(RetryOn::empty(), RetryOn::parse_grpc_header);
            http | grpc
        } else {
            policy.retry_on
        };

        let max_retries = match max_retries.as_deref().map(|v| v.trim().parse::<u32>()) {
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                tracing::debug!("ignoring malformed {} header", MAX_RETRIES);
                policy.num_retries
            }
            None => policy.num_retries,
        };

        let retriable_status_codes = match status_codes.as_deref() {
            Some(value) => parse_status_codes(value).unwrap_or_else(|| {
                tracing::debug!(value, "ignoring malformed {} header", RETRIABLE_STATUS_CODES);
                policy.retriable_status_codes.clone()
            }),
            None => policy.retriable_status_codes.clone(),
        };

        Self {
            retry_on,
            max_retries,
            retriable_status_codes,
            base_interval: policy.base_interval(),
            max_interval: policy.max_interval(),
            host_selection_max_attempts: policy.host_selection_max_attempts,
        }
    }
}

/// Remove `name` and return its value as text. Every occurrence is removed;
/// the first one wins. A present but non-UTF-8 value reads as empty, so it
/// still overrides the policy and then fails to parse.
fn take_str(headers: &mut HeaderMap, name: &HeaderName) -> Option<String> {
    match headers.entry(name) {
        http::header::Entry::Occupied(entry) => {
            let (_, mut values) = entry.remove_entry_mult();
            values
                .next()
                .map(|v| v.to_str().map(str::to_owned).unwrap_or_default())
        }
        http::header::Entry::Vacant(_) => None,
    }
}

/// Parse a comma-separated status code list.
///
/// Each entry is trimmed and its leading decimal digits are taken, so
/// `"418 junk"` is 418. An entry that does not start with a digit, or that
/// is not a valid HTTP status, invalidates the whole list and `None` is
/// returned.
pub fn parse_status_codes(value: &str) -> Option<Vec<u16>> {
    value
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            let end = entry
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(entry.len());
            let code: u16 = entry[..end].parse().ok()?;
            (100..=599).contains(&code).then_some(code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append((*name).clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn status_codes_take_leading_digits() {
        assert_eq!(parse_status_codes("200"), Some(vec![200]));
        assert_eq!(parse_status_codes("418,200"), Some(vec![418, 200]));
        assert_eq!(parse_status_codes("   418 junk,200"), Some(vec![418, 200]));
    }

    #[test]
    fn one_malformed_status_code_poisons_the_list() {
        assert_eq!(parse_status_codes("   418 junk,xxx200"), None);
        assert_eq!(parse_status_codes("200,"), None);
        assert_eq!(parse_status_codes(""), None);
        assert_eq!(parse_status_codes("99999"), None);
        assert_eq!(parse_status_codes("42"), None);
    }

    #[test]
    fn no_headers_keeps_policy() {
        let policy = RetryPolicy {
            retry_on: RetryOn::CONNECT_FAILURE,
            num_retries: 4,
            retriable_status_codes: vec![409],
            host_selection_max_attempts: 3,
            ..RetryPolicy::default()
        };
        let mut req = HeaderMap::new();
        let eff = EffectivePolicy::resolve(&policy, &mut req);
        assert_eq!(eff.retry_on, RetryOn::CONNECT_FAILURE);
        assert_eq!(eff.max_retries, 4);
        assert_eq!(eff.retriable_status_codes, vec![409]);
        assert_eq!(eff.base_interval, Duration::from_millis(25));
        assert_eq!(eff.max_interval, Duration::from_millis(250));
        assert_eq!(eff.host_selection_max_attempts, 3);
    }

    #[test]
    fn trigger_headers_replace_policy_triggers() {
        let policy = RetryPolicy {
            retry_on: RetryOn::FIVE_XX,
            ..RetryPolicy::default()
        };
        let mut req = headers(&[(&RETRY_ON, "connect-failure"), (&RETRY_GRPC_ON, "cancelled")]);
        let eff = EffectivePolicy::resolve(&policy, &mut req);
        assert_eq!(eff.retry_on, RetryOn::CONNECT_FAILURE | RetryOn::GRPC_CANCELLED);
        assert!(!eff.retry_on.contains(RetryOn::FIVE_XX));
    }

    #[test]
    fn unknown_trigger_header_disables_policy_triggers() {
        let policy = RetryPolicy {
            retry_on: RetryOn::FIVE_XX,
            ..RetryPolicy::default()
        };
        let mut req = headers(&[(&RETRY_ON, "not-a-trigger")]);
        assert!(EffectivePolicy::resolve(&policy, &mut req).retry_on.is_empty());
    }

    #[test]
    fn unreadable_trigger_header_still_overrides_policy() {
        let policy = RetryPolicy {
            retry_on: RetryOn::FIVE_XX,
            num_retries: 2,
            ..RetryPolicy::default()
        };
        let mut req = HeaderMap::new();
        req.insert(RETRY_ON, HeaderValue::from_bytes(b"5xx\xff").unwrap());
        req.insert(MAX_RETRIES, HeaderValue::from_bytes(b"\xff").unwrap());
        let eff = EffectivePolicy::resolve(&policy, &mut req);
        assert!(eff.retry_on.is_empty());
        assert_eq!(eff.max_retries, 2);
        assert!(req.is_empty());
    }

    #[test]
    fn override_headers_are_stripped() {
        let mut req = headers(&[
            (&RETRY_ON, "5xx"),
            (&RETRY_GRPC_ON, "internal"),
            (&MAX_RETRIES, "3"),
            (&RETRIABLE_STATUS_CODES, "418"),
        ]);
        req.insert("x-request-id", HeaderValue::from_static("abc"));
        let eff = EffectivePolicy::resolve(&RetryPolicy::default(), &mut req);
        assert_eq!(eff.max_retries, 3);
        assert_eq!(eff.retriable_status_codes, vec![418]);
        assert_eq!(req.len(), 1);
        assert!(req.contains_key("x-request-id"));
    }

    #[test]
    fn malformed_overrides_fall_back_to_policy() {
        let policy = RetryPolicy {
            num_retries: 2,
            retriable_status_codes: vec![409],
            ..RetryPolicy::default()
        };
        let mut req = headers(&[(&MAX_RETRIES, "lots"), (&RETRIABLE_STATUS_CODES, "xxx")]);
        let eff = EffectivePolicy::resolve(&policy, &mut req);
        assert_eq!(eff.max_retries, 2);
        assert_eq!(eff.retriable_status_codes, vec![409]);
        assert!(req.is_empty());
    }
}
