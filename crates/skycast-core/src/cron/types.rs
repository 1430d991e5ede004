use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use skycast_config::ScheduleConfig;

use crate::error::{Error, Result};

/// A once-a-day wall-clock schedule in a fixed IANA timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
    timezone: Tz,
    misfire_grace: Duration,
}

/// What to do when the timer wakes for a scheduled occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    /// Woke too late; the occurrence is dropped, not queued.
    Skip { late_by: Duration },
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, timezone: &str, misfire_grace: Duration) -> Result<Self> {
        if hour > 23 {
            return Err(Error::Configuration(format!(
                "schedule hour must be 0-23, got {hour}"
            )));
        }
        if minute > 59 {
            return Err(Error::Configuration(format!(
                "schedule minute must be 0-59, got {minute}"
            )));
        }
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| Error::Configuration(format!("unknown timezone '{timezone}'")))?;
        Ok(Self {
            hour,
            minute,
            timezone,
            misfire_grace,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::new(
            config.hour,
            config.minute,
            &config.timezone,
            Duration::from_secs(config.misfire_grace_secs),
        )
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn misfire_grace(&self) -> Duration {
        self.misfire_grace
    }

    /// Five-field cron expression, evaluated in [`Self::timezone`].
    pub fn expression(&self) -> String {
        format!("{} {} * * *", self.minute, self.hour)
    }

    /// First occurrence strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let expr = self.expression();
        let cron = Cron::new(&expr)
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid cron expression '{expr}': {e}")))?;
        let local = after.with_timezone(&self.timezone);
        cron.find_next_occurrence(&local, false)
            .map(|next| next.with_timezone(&Utc))
            .map_err(|e| Error::Configuration(format!("no next occurrence for '{expr}': {e}")))
    }

    /// Fire when `now` is at most the grace window past `scheduled`.
    pub fn fire_decision(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> FireDecision {
        let late_by = (now - scheduled).to_std().unwrap_or(Duration::ZERO);
        if late_by <= self.misfire_grace {
            FireDecision::Fire
        } else {
            FireDecision::Skip { late_by }
        }
    }
}
