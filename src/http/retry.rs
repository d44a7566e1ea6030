use std::collections::HashMap;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// HTTP-date values are ignored because vendors use the numeric form.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Statuses worth another attempt: timeouts, conflicts, throttling and server errors.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429) || (500..600).contains(&status)
}

/// Backoff schedule for one request: exponential from 500ms with light jitter, capped at 8s.
///
/// There is no elapsed-time limit; the attempt budget in [`super::RequestPolicy`] bounds it.
pub(crate) fn exponential_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(BASE_DELAY)
        .with_randomization_factor(0.2)
        .with_multiplier(2.0)
        .with_max_interval(MAX_DELAY)
        .with_max_elapsed_time(None)
        .build()
}

/// Marks `err` as worth another attempt, honoring a vendor-supplied `Retry-After`.
///
/// The header is capped like the schedule so a misbehaving value cannot stall the caller.
pub(crate) fn transient<E>(err: E, retry_after: Option<Duration>) -> backoff::Error<E> {
    match retry_after {
        Some(wait) => backoff::Error::retry_after(err, wait.min(MAX_DELAY)),
        None => backoff::Error::transient(err),
    }
}
