//! Operational clock.
//!
//! Every deadline in the engine is a civil date/time in one fixed timezone.
//! Arithmetic happens on the wall clock and is converted to an instant last,
//! so a 48 hour lead across a DST change still lands on the same local time.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
pub struct ManualTimeSource {
    now: RwLock<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut guard) => *guard = instant,
            Err(poisoned) => *poisoned.into_inner() = instant,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct Clock {
    tz: Tz,
    source: Arc<dyn TimeSource>,
}

impl Clock {
    pub fn system(tz: Tz) -> Self {
        Self {
            tz,
            source: Arc::new(SystemTimeSource),
        }
    }

    pub fn manual(tz: Tz, start: DateTime<Utc>) -> (Self, Arc<ManualTimeSource>) {
        let source = Arc::new(ManualTimeSource::new(start));
        (
            Self {
                tz,
                source: source.clone(),
            },
            source,
        )
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.source.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(self.now())
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    pub fn civil_instant(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        self.resolve_local(date.and_time(time))
    }

    /// Instant of `date time` shifted by `offset` on the wall clock.
    pub fn civil_offset(&self, date: NaiveDate, time: NaiveTime, offset: Duration) -> DateTime<Utc> {
        self.resolve_local(date.and_time(time) + offset)
    }

    pub fn days_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        (to - from).num_days()
    }

    pub fn add_days(&self, date: NaiveDate, days: i64) -> NaiveDate {
        date + Duration::days(days)
    }

    /// Monday of the week containing `date`.
    pub fn week_start(&self, date: NaiveDate) -> NaiveDate {
        week_start(date)
    }

    fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        if let Some(resolved) = self.tz.from_local_datetime(&local).earliest() {
            return resolved.with_timezone(&Utc);
        }

        // spring-forward gap: the wall time does not exist, take the first valid time after it
        let shifted = local + Duration::hours(1);
        match self.tz.from_local_datetime(&shifted).earliest() {
            Some(resolved) => resolved.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&local),
        }
    }
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}
