use chrono::{DateTime, Duration, DurationRound, TimeDelta, Utc};

/// Closed time interval an extraction covers. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow { start, end }
    }

    /// `[now - hours, now]`. A zero lookback is widened to one hour.
    pub fn lookback_hours(now: DateTime<Utc>, hours: u32) -> TimeWindow {
        let hours = hours.max(1);
        TimeWindow {
            start: now - Duration::hours(hours.into()),
            end: now,
        }
    }

    /// Day `day` counted backwards from `now`, 1-based:
    /// `[now - day * 24h, now - (day - 1) * 24h]`.
    pub fn day(now: DateTime<Utc>, day: u32) -> TimeWindow {
        let day = i64::from(day.max(1));
        TimeWindow {
            start: now - Duration::days(day),
            end: now - Duration::days(day - 1),
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp <= self.end
    }

    pub fn duration_ms(&self) -> u64 {
        (self.end - self.start).num_milliseconds().max(0) as u64
    }

    pub fn start_unix(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_unix(&self) -> i64 {
        self.end.timestamp()
    }
}

/// Snapshot bucket: the hour a measurement belongs to.
pub fn hour_bucket(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::hours(1))
        .unwrap_or(timestamp)
}
