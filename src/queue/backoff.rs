use rand::Rng;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// `base * 2^(attempt - 1)`, capped.
pub fn exponential(base: Duration, attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 20) as u32;
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

/// Exponential backoff before retry number `attempt` (1-based), with equal
/// jitter: the delay lands in `[exp / 2, exp]`.
pub fn retry_delay(base: Duration, attempt: i32) -> Duration {
    jittered(exponential(base, attempt))
}

fn jittered(backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    let half_ms = backoff_ms / 2;
    let jitter_ms = rand::rng().random_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}
