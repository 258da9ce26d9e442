use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Whether the event list is an in-progress stream or a finished replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Durations and visibility are computed against wall-clock now.
    #[default]
    Live,
    /// Everything is treated as finished; now is never consulted.
    Historical,
}

impl ReplayMode {
    pub fn is_historical(&self) -> bool {
        matches!(self, ReplayMode::Historical)
    }
}

/// Source of "now" for live elapsed times.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant. Useful for rendering a consistent frame.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Elapsed time for running and finished items.
///
/// Live elapsed times are recomputed on every query; callers poll (e.g. once a
/// second) while something is running. Results are never negative.
pub struct DurationTracker<C: Clock = SystemClock> {
    mode: ReplayMode,
    clock: C,
}

impl DurationTracker<SystemClock> {
    pub fn new(mode: ReplayMode) -> Self {
        Self {
            mode,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> DurationTracker<C> {
    pub fn with_clock<D: Clock>(self, clock: D) -> DurationTracker<D> {
        DurationTracker {
            mode: self.mode,
            clock,
        }
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    pub fn elapsed(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Duration {
        let until = match (end, self.mode) {
            (Some(end), _) => end,
            (None, ReplayMode::Live) => self.clock.now(),
            // Replays have no meaningful now.
            (None, ReplayMode::Historical) => start,
        };
        (until - start).max(Duration::zero())
    }

    /// Like [`elapsed`](Self::elapsed), but tolerates an unknown start.
    pub fn elapsed_opt(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<Duration> {
        start.map(|start| self.elapsed(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn historical_without_end_is_zero() {
        let tracker = DurationTracker::new(ReplayMode::Historical).with_clock(FixedClock(ts(10_000)));
        assert_eq!(tracker.elapsed(ts(100), None), Duration::zero());
    }

    #[test]
    fn live_without_end_uses_now() {
        let tracker = DurationTracker::new(ReplayMode::Live).with_clock(FixedClock(ts(130)));
        assert_eq!(tracker.elapsed(ts(100), None), Duration::seconds(30));
    }

    #[test]
    fn end_wins_in_both_modes() {
        for mode in [ReplayMode::Live, ReplayMode::Historical] {
            let tracker = DurationTracker::new(mode).with_clock(FixedClock(ts(9_999)));
            assert_eq!(tracker.elapsed(ts(100), Some(ts(145))), Duration::seconds(45));
        }
    }

    #[test]
    fn never_negative() {
        let tracker = DurationTracker::new(ReplayMode::Live).with_clock(FixedClock(ts(50)));
        assert_eq!(tracker.elapsed(ts(100), None), Duration::zero());
        assert_eq!(tracker.elapsed(ts(100), Some(ts(90))), Duration::zero());
    }

    #[test]
    fn live_recomputes_per_query() {
        let tracker = DurationTracker::new(ReplayMode::Live);
        let start = Utc::now() - Duration::seconds(5);
        let first = tracker.elapsed(start, None);
        let second = tracker.elapsed(start, None);
        assert!(first >= Duration::seconds(5));
        assert!(second >= first);
    }

    #[test]
    fn unknown_start_yields_none() {
        let tracker = DurationTracker::new(ReplayMode::Historical);
        assert_eq!(tracker.elapsed_opt(None, Some(ts(1))), None);
    }
}
