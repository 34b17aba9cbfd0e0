//! Failure classification and backoff for gateway calls

use std::time::{Duration, SystemTime};

use crate::Error;

/// Retry policy for gateway calls
///
/// Only transient failures are retried; rate limits and identity faults are
/// returned to the caller immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Whether a failed call is worth repeating
///
/// Server errors (5xx) and transient network failures surfaced in the body
/// text are; 429 is not, it becomes `Error::RateLimited`.
#[must_use]
pub fn is_recoverable(status: u16, body: &str) -> bool {
    if (500..600).contains(&status) {
        return true;
    }

    let lower = body.to_lowercase();
    lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("dns error")
}

/// Whether a failed call means the identity lost its authorization
#[must_use]
pub fn is_identity_fault(status: u16, description: &str) -> bool {
    if status == 401 {
        return true;
    }

    let lower = description.to_lowercase();
    lower.contains("auth_key_duplicated")
        || lower.contains("auth_key_unregistered")
        || lower.contains("session_revoked")
        || (lower.contains("authorization key") && lower.contains("two different ip"))
}

/// Extract `parameters.retry_after` (seconds) from an error body
///
/// Returns `None` if the field is absent or the body is not valid JSON.
#[must_use]
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = v.get("parameters")?.get("retry_after")?.as_u64()?;

    Some(Duration::from_secs(secs))
}

/// Map a non-success reply to the matching error
#[must_use]
pub fn classify(status: u16, body: &str) -> Error {
    let description = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("description")?.as_str().map(String::from))
        .unwrap_or_else(|| body.to_string());

    if status == 429 {
        return Error::RateLimited {
            retry_after: parse_retry_after(body).unwrap_or(Duration::from_secs(1)),
        };
    }
    if is_identity_fault(status, &description) {
        return Error::SessionInvalid(description);
    }
    Error::Gateway(format!("{status}: {description}"))
}

/// Backoff before retry number `attempt + 1`
///
/// Doubles from `base_delay` and adds up to a quarter on top, never
/// exceeding `max_delay`. The spread comes from the sub-second clock.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let doubled = policy
        .base_delay
        .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(policy.max_delay);

    let spread = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |since| since.subsec_micros() % 251);

    (doubled + doubled.mul_f64(f64::from(spread) / 1000.0)).min(policy.max_delay)
}
