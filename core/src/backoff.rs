//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;

/// Base delay for attempt zero, in seconds.
const BASE_SECONDS: f64 = 0.5;

/// Delay before retrying after `attempt` previous attempts.
///
/// `0.5 * 2^attempt` seconds, capped at `max`, then scaled by a uniform
/// random factor in `[0, 1)`.
pub fn backoff(attempt: u32, max: Duration) -> Duration {
    backoff_with_rng(attempt, max, &mut rand::thread_rng())
}

/// [`backoff`] with a caller-supplied random source.
pub fn backoff_with_rng<R: Rng + ?Sized>(attempt: u32, max: Duration, rng: &mut R) -> Duration {
    capped_delay(attempt, max).mul_f64(rng.gen::<f64>())
}

/// The jitter-free upper bound for `attempt`.
pub fn capped_delay(attempt: u32, max: Duration) -> Duration {
    // 2^64 already dwarfs any sane cap; clamp so the exponent fits an i32.
    let exponent = attempt.min(64) as i32;
    let seconds = BASE_SECONDS * 2f64.powi(exponent);
    if seconds >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(seconds)
    }
}
