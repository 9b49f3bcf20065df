//! Delay until the next cycle.
//!
//! The calculation is pure in `(now, trigger)`; the main loop does the
//! actual sleeping. Daily triggers are expressed in a fixed UTC offset, so
//! there is no daylight-saving adjustment.

use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};
use thiserror::Error;

use lockbox_core::{Schedule, Trigger};

/// An impossible scheduling result. Treated as a defect: the loop stops
/// instead of busy-looping or silently skipping cycles.
#[derive(Debug, Error)]
pub enum SchedulerFault {
    #[error("non-positive delay ({delay_ms} ms) computed at {now} for trigger {target}")]
    NonPositiveDelay {
        now: DateTime<Utc>,
        target: DateTime<Utc>,
        delay_ms: i64,
    },

    #[error("no trigger instant for {time} at offset {offset} after {now}")]
    NoTriggerInstant {
        now: DateTime<Utc>,
        time: NaiveTime,
        offset: FixedOffset,
    },

    #[error("interval schedule has a zero period")]
    ZeroInterval,
}

/// Time from `now` until the next occurrence of `time` in `offset`.
///
/// If `now` is exactly on the trigger instant the next one is a full day
/// away, so the result is never zero and always at most 24 hours.
pub fn next_trigger_delay(
    now: DateTime<Utc>,
    time: NaiveTime,
    offset: FixedOffset,
) -> Result<Duration, SchedulerFault> {
    let target = next_trigger_at(now, time, offset)?;
    let delta = target - now;
    match delta.to_std() {
        Ok(delay) if !delay.is_zero() => Ok(delay),
        _ => Err(SchedulerFault::NonPositiveDelay {
            now,
            target,
            delay_ms: delta.num_milliseconds(),
        }),
    }
}

/// The first trigger instant strictly after `now`.
pub fn next_trigger_at(
    now: DateTime<Utc>,
    time: NaiveTime,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, SchedulerFault> {
    let fault = || SchedulerFault::NoTriggerInstant { now, time, offset };

    let local_date = now.with_timezone(&offset).date_naive();
    let today = offset
        .from_local_datetime(&local_date.and_time(time))
        .single()
        .ok_or_else(fault)?
        .with_timezone(&Utc);

    if today > now {
        return Ok(today);
    }
    let tomorrow = local_date.checked_add_days(Days::new(1)).ok_or_else(fault)?;
    offset
        .from_local_datetime(&tomorrow.and_time(time))
        .single()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(fault)
}

/// Delay before the next scheduled cycle under `schedule`.
pub fn delay_until_next(schedule: &Schedule, now: DateTime<Utc>) -> Result<Duration, SchedulerFault> {
    match schedule.trigger {
        Trigger::DailyAt { time, offset } => next_trigger_delay(now, time, offset),
        Trigger::Every(period) if period.is_zero() => Err(SchedulerFault::ZeroInterval),
        Trigger::Every(period) => Ok(period),
    }
}
