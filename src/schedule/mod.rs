pub mod cron;
pub mod interval;

pub use cron::CronSchedule;
pub use interval::IntervalSchedule;

use crate::errors::SchedulerError;
use chrono::{DateTime, Local};
use std::ops::Deref;

/// [`TaskSchedule`] calculates the next point in time a task should run, given the time it last
/// ran (or the time the task was compiled, for the very first iteration). The scheduler is
/// consulted once per iteration by [`MonitorTask`](crate::task::MonitorTask) and never mutates
/// itself from `next_after` — implementations are pure functions of their own configuration and
/// the supplied time.
///
/// # Trait Implementation(s)
/// - [`IntervalSchedule`] — fixed-duration schedules from an `every:` clause.
/// - [`CronSchedule`] — cron-field schedules from an `at:` clause.
///
/// Implemented for any `T: Deref<Target: TaskSchedule>` so owned and `Arc`-wrapped schedules are
/// interchangeable at call sites.
pub trait TaskSchedule: Send + Sync {
    /// Returns the next duration to sleep, measured from `now`, strictly greater than zero
    /// duration after `now` for cron schedules and exactly the configured interval for interval
    /// schedules.
    fn next_after(&self, now: &DateTime<Local>) -> Result<chrono::TimeDelta, SchedulerError>;
}

impl<T> TaskSchedule for T
where
    T: Deref + Send + Sync,
    T::Target: TaskSchedule,
{
    fn next_after(&self, now: &DateTime<Local>) -> Result<chrono::TimeDelta, SchedulerError> {
        self.deref().next_after(now)
    }
}
