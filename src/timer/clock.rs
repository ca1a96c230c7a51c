//! Tick arithmetic for the timer's clock thread.

use std::time::{Duration, Instant};

use tracing::debug;

/// Resolution of the shared default timer.
pub const DEFAULT_RESOLUTION_MS: u32 = 100;

/// Larger gaps than this between two wakes are not caught up tick by tick.
pub const MAX_CATCH_UP: Duration = Duration::from_secs(10);

/// Converts wall time into a count of elapsed ticks.
pub(crate) struct Clock {
    resolution: Duration,
    baseline: Instant,
}

impl Clock {
    pub(crate) fn new(resolution_ms: u32, now: Instant) -> Self {
        Self {
            resolution: Duration::from_millis(u64::from(resolution_ms)),
            baseline: now,
        }
    }

    /// Time elapsed since the last counted tick.
    pub(crate) fn since_tick(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.baseline)
    }

    /// Time left until the next tick is due.
    pub(crate) fn until_next(&self, now: Instant) -> Duration {
        (self.baseline + self.resolution).saturating_duration_since(now)
    }

    /// Number of ticks to fire at `now`, advancing the baseline past them.
    ///
    /// A clock that went backwards, or a gap longer than [`MAX_CATCH_UP`], resyncs the
    /// baseline to `now` and yields exactly one tick.
    pub(crate) fn ticks_due(&mut self, now: Instant) -> u64 {
        let elapsed = match now.checked_duration_since(self.baseline) {
            Some(elapsed) if elapsed <= MAX_CATCH_UP => elapsed,
            other => {
                debug!(elapsed = ?other, "timer clock jumped, resynchronizing");
                self.baseline = now;
                return 1;
            }
        };

        let ticks = elapsed.as_nanos() / self.resolution.as_nanos().max(1);
        // Bounded by MAX_CATCH_UP at 1 ms resolution.
        let ticks = u32::try_from(ticks).unwrap_or(u32::MAX);
        self.baseline += self.resolution * ticks;

        u64::from(ticks)
    }
}

/// Tick of the first fire for an entry scheduled `ms` from now, `since_tick` after the
/// last counted tick.
///
/// The entry fires on the first tick at least `ms` away, which is less than one
/// resolution past `ms`.
pub(crate) fn first_deadline(tick: u64, ms: u32, since_tick: Duration, resolution_ms: u32) -> u64 {
    let resolution = u128::from(resolution_ms) * 1_000_000;
    let wait = u128::from(ms) * 1_000_000 + since_tick.as_nanos();
    let ticks = wait.div_ceil(resolution).max(1);

    tick + u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Tick of the next fire of a periodic entry that fired at `tick`.
///
/// The remainder of `repeat_ms` that does not fill a whole tick is carried into the
/// next period so the long-run rate matches `repeat_ms`.
pub(crate) fn next_deadline(tick: u64, repeat_ms: u32, carry_ms: &mut u32, resolution_ms: u32) -> u64 {
    let total = u64::from(repeat_ms) + u64::from(*carry_ms);
    let resolution = u64::from(resolution_ms);

    if total < resolution {
        *carry_ms = 0;
        return tick + 1;
    }

    // Always below the resolution, so it fits.
    *carry_ms = (total % resolution) as u32;
    tick + total / resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_up_counts_whole_ticks() {
        let start = Instant::now();
        let mut clock = Clock::new(100, start);

        assert_eq!(clock.ticks_due(start + Duration::from_millis(50)), 0);
        assert_eq!(clock.ticks_due(start + Duration::from_millis(350)), 3);
        // The 50 ms remainder stays owed to the next tick.
        assert_eq!(clock.until_next(start + Duration::from_millis(350)), Duration::from_millis(50));
    }

    #[test]
    fn test_large_jump_resyncs_to_one_tick() {
        let start = Instant::now();
        let mut clock = Clock::new(100, start);
        let later = start + MAX_CATCH_UP + Duration::from_secs(1);

        assert_eq!(clock.ticks_due(later), 1);
        assert_eq!(clock.until_next(later), Duration::from_millis(100));
    }

    #[test]
    fn test_first_deadline_is_never_early() {
        let ms = Duration::from_millis;

        assert_eq!(first_deadline(10, 0, ms(0), 100), 11);
        assert_eq!(first_deadline(10, 100, ms(0), 100), 11);
        assert_eq!(first_deadline(10, 99, ms(50), 100), 12);
        assert_eq!(first_deadline(10, 250, ms(30), 100), 13);
    }

    #[test]
    fn test_periodic_carry_keeps_long_run_rate() {
        let mut carry = 0;
        let mut tick = 0;
        let mut fires = Vec::new();

        for _ in 0..4 {
            tick = next_deadline(tick, 150, &mut carry, 100);
            fires.push(tick);
        }

        // 150 ms periods land on 1, 3, 4, 6 ticks: 600 ms after four periods.
        assert_eq!(fires, vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_short_periods_fire_every_tick() {
        let mut carry = 0;

        assert_eq!(next_deadline(5, 30, &mut carry, 100), 6);
        assert_eq!(carry, 0);
    }
}
