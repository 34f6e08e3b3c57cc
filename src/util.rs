use std::{future::Future, time::Duration};

use crate::Instant;

/// Time remaining before data stamped at `updated_at` goes stale, as seen
/// from `now`. Zero means already stale.
pub(crate) fn time_until_stale(updated_at: Instant, stale_time: Duration, now: Instant) -> Duration {
    let updated_at = updated_at.0.as_millis() as i64;
    let now = now.0.as_millis() as i64;
    let stale_time = stale_time.as_millis() as i64;
    let result = (updated_at + stale_time) - now;
    let ensure_non_negative = result.max(0);
    Duration::from_millis(ensure_non_negative as u64)
}

pub(crate) fn spawn_detached(future: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => {
            tracing::warn!("no tokio runtime available; query will only progress when awaited")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Instant {
        Instant(Duration::from_millis(millis))
    }

    #[test]
    fn counts_down_to_zero() {
        let updated_at = at(1_000);
        let stale_time = Duration::from_millis(100);

        assert_eq!(
            time_until_stale(updated_at, stale_time, at(1_000)),
            Duration::from_millis(100)
        );
        assert_eq!(
            time_until_stale(updated_at, stale_time, at(1_060)),
            Duration::from_millis(40)
        );
        assert!(time_until_stale(updated_at, stale_time, at(1_100)).is_zero());
        assert!(time_until_stale(updated_at, stale_time, at(2_000)).is_zero());
    }

    #[test]
    fn staleness_is_monotonic_in_elapsed_time() {
        let updated_at = at(500);
        let stale_time = Duration::from_millis(250);

        let mut previous = time_until_stale(updated_at, stale_time, at(500));
        for now in (500u64..1_200).step_by(50) {
            let remaining = time_until_stale(updated_at, stale_time, at(now));
            assert!(remaining <= previous);
            previous = remaining;
        }
        assert!(previous.is_zero());
    }

    #[test]
    fn zero_stale_time_is_immediately_stale() {
        assert!(time_until_stale(at(42), Duration::ZERO, at(42)).is_zero());
    }
}
