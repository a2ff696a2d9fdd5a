use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use std::time::Duration;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Delay after a boundary before flushing, so readings stamped exactly on the
/// boundary have arrived.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

const NANOS_PER_SEC: i64 = 1_000_000_000;
const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86_400;

/// Returns the first wall-clock boundary at or after `now` that is a whole
/// number of `period`s past the start of the day (periods of an hour or more)
/// or the start of the hour (shorter periods).
///
/// A period that does not divide the day/hour evenly is cut short at
/// midnight/the top of the hour.
pub fn next_boundary(now: NaiveDateTime, period: Duration) -> NaiveDateTime {
    let span_secs = if period >= Duration::from_secs(HOUR_SECS as u64) {
        DAY_SECS
    } else {
        HOUR_SECS
    };
    // Periods longer than the span all end at the span's end
    let period_nanos = i64::try_from(period.as_nanos())
        .unwrap_or(i64::MAX)
        .clamp(NANOS_PER_SEC, span_secs * NANOS_PER_SEC);

    let secs_into_span = now.num_seconds_from_midnight() as i64 % span_secs;
    // Leap seconds report more than a second of nanos
    let sub_second = (now.nanosecond() as i64).min(NANOS_PER_SEC - 1);
    let elapsed = secs_into_span * NANOS_PER_SEC + sub_second;

    let periods = (elapsed + period_nanos - 1) / period_nanos;
    let offset = (periods * period_nanos).min(span_secs * NANOS_PER_SEC);

    now + TimeDelta::nanoseconds(offset - elapsed)
}

/// Instant of the first flush for a sensor started at `now`.
pub fn first_flush(now: NaiveDateTime, period: Duration) -> NaiveDateTime {
    next_boundary(now, period) + TimeDelta::seconds(SETTLE_DELAY.as_secs() as i64)
}

/// Time to wait from `now` until `target`, zero if it has already passed.
pub fn until(now: NaiveDateTime, target: NaiveDateTime) -> Duration {
    (target - now).to_std().unwrap_or(Duration::ZERO)
}
