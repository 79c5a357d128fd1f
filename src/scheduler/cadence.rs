//! Drift-corrected wake-up times for one target.

use std::time::Duration;
use tokio::time::Instant;

/// Stagger between the first checks of consecutive target ids.
pub const STAGGER_STEP: Duration = Duration::from_millis(100);

/// Scheduling state of a check loop.
///
/// The checkpoint advances by exactly one interval per cycle, so wake-ups
/// stay on a fixed grid however long each check takes.
#[derive(Debug, Clone)]
pub struct Cadence {
    checkpoint: Instant,
    interval: Duration,
    sleep: Duration,
}

impl Cadence {
    /// Start a cadence at `now`. The first check runs after an id-derived stagger.
    pub fn new(now: Instant, interval: Duration, id: i64) -> Self {
        let stagger = STAGGER_STEP * u32::try_from(id.max(0)).unwrap_or(u32::MAX);
        Self {
            checkpoint: now,
            interval,
            sleep: stagger,
        }
    }

    pub fn checkpoint(&self) -> Instant {
        self.checkpoint
    }

    /// How long to wait before the next check.
    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    /// Move to the next cycle after a check finished at `now`.
    ///
    /// Offline targets wait a full interval from `now` instead of catching up
    /// to the grid.
    pub fn advance(&mut self, now: Instant, online: bool) -> Duration {
        self.checkpoint += self.interval;
        self.sleep = if online {
            self.checkpoint.saturating_duration_since(now)
        } else {
            self.interval
        };
        self.sleep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_sleep_is_staggered_by_id() {
        let now = Instant::now();
        assert_eq!(Cadence::new(now, Duration::from_secs(60), 0).sleep(), Duration::ZERO);
        assert_eq!(
            Cadence::new(now, Duration::from_secs(60), 3).sleep(),
            Duration::from_millis(300)
        );
        assert_eq!(Cadence::new(now, Duration::from_secs(60), -5).sleep(), Duration::ZERO);
    }

    #[test]
    fn test_checkpoint_does_not_accumulate_check_time() {
        let start = Instant::now();
        let interval = Duration::from_secs(10);
        let mut cadence = Cadence::new(start, interval, 0);

        let check_durations = [1u64, 4, 2, 9, 3];
        let mut now = start;
        for (n, d) in check_durations.iter().enumerate() {
            now += cadence.sleep() + Duration::from_secs(*d);
            cadence.advance(now, true);
            assert_eq!(cadence.checkpoint(), start + interval * (n as u32 + 1));
            assert_eq!(cadence.checkpoint(), now + cadence.sleep());
        }
    }

    #[test]
    fn test_offline_sleeps_full_interval() {
        let start = Instant::now();
        let interval = Duration::from_secs(10);
        let mut cadence = Cadence::new(start, interval, 0);

        let sleep = cadence.advance(start + Duration::from_secs(4), false);
        assert_eq!(sleep, interval);
        assert_eq!(cadence.checkpoint(), start + interval);
    }

    #[test]
    fn test_late_check_does_not_sleep_negative() {
        let start = Instant::now();
        let mut cadence = Cadence::new(start, Duration::from_secs(5), 0);

        let sleep = cadence.advance(start + Duration::from_secs(8), true);
        assert_eq!(sleep, Duration::ZERO);
    }
}
