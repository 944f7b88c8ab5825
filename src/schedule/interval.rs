use crate::errors::SchedulerError;
use crate::schedule::TaskSchedule;
use chrono::{DateTime, Local, TimeDelta};

/// [`IntervalSchedule`] is a fixed-duration schedule lowered from an `every:` clause. Every call
/// to [`TaskSchedule::next_after`] returns the same duration, independent of `now` — it is the
/// schedule used by scenario 2 in the testable-properties section.
///
/// # Construction
/// Built from the `Σ field·unit` sum of a catalog entry's `every:` mapping via
/// [`IntervalSchedule::from_secs_f64`], or directly from a [`TimeDelta`] via
/// [`IntervalSchedule::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalSchedule(TimeDelta);

impl IntervalSchedule {
    pub fn new(interval: TimeDelta) -> Self {
        Self(interval)
    }

    pub fn from_secs_f64(seconds: f64) -> Result<Self, SchedulerError> {
        if seconds < 0.0 {
            return Err(SchedulerError::NegativeInterval);
        }
        TimeDelta::milliseconds((seconds * 1000.0).round() as i64)
            .map(Self)
            .ok_or(SchedulerError::NegativeInterval)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.num_milliseconds() as f64 / 1000.0
    }
}

impl TaskSchedule for IntervalSchedule {
    fn next_after(&self, _now: &DateTime<Local>) -> Result<TimeDelta, SchedulerError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_call_returns_the_same_duration() {
        let sched = IntervalSchedule::from_secs_f64(3.0).unwrap();
        let now = Local::now();
        for _ in 0..5 {
            assert_eq!(sched.next_after(&now).unwrap(), TimeDelta::seconds(3));
        }
    }

    #[test]
    fn default_interval_is_ten_seconds() {
        let sched = IntervalSchedule::from_secs_f64(10.0).unwrap();
        assert_eq!(sched.as_secs_f64(), 10.0);
    }

    #[test]
    fn negative_interval_is_rejected() {
        assert!(IntervalSchedule::from_secs_f64(-1.0).is_err());
    }
}
