use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use tracing::debug;

use crate::config::Config;
use crate::datetime::{local_date, local_midnight, parse_timezone, parse_weekday_name, resolve_timezone, start_of_week};

/// The instant, timezone and week convention every derivation is computed
/// against. Passed explicitly so derived views stay reproducible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewContext {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub week_start: Weekday,
}

impl ViewContext {
    pub fn new(now: DateTime<Utc>, timezone: Tz, week_start: Weekday) -> Self {
        Self {
            now,
            timezone,
            week_start,
        }
    }

    /// UTC with Sunday-first weeks.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, chrono_tz::UTC, Weekday::Sun)
    }

    pub fn from_config(cfg: &Config, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let timezone = match cfg.get("timezone") {
            Some(raw) => parse_timezone(&raw, "config")
                .ok_or_else(|| anyhow!("invalid timezone setting: {raw}"))?,
            None => resolve_timezone(),
        };

        let week_start = match cfg.get("week.start") {
            Some(raw) => parse_weekday_name(&raw)
                .ok_or_else(|| anyhow!("invalid week.start setting: {raw}"))?,
            None => Weekday::Sun,
        };

        debug!(timezone = %timezone, ?week_start, "resolved view context");
        Ok(Self::new(now, timezone, week_start))
    }

    pub fn local_date(&self, dt: DateTime<Utc>) -> NaiveDate {
        local_date(dt, self.timezone)
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(self.now)
    }

    /// First local instant of the current week.
    pub fn week_boundary(&self) -> DateTime<Utc> {
        let first_day = start_of_week(self.today(), self.week_start);
        local_midnight(first_day, self.timezone)
    }
}
