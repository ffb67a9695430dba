use std::time::Duration;

/// Delay from one attempt's start to the next.
///
/// With no failures this is the poll interval. Each consecutive failure
/// doubles it, up to `max_backoff`.
pub fn next_delay(poll_interval: Duration, max_backoff: Duration, consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return poll_interval;
    }
    let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
    poll_interval
        .checked_mul(factor)
        .unwrap_or(Duration::MAX)
        .min(max_backoff.max(poll_interval))
}
