// ABOUTME: Recurring-trigger helpers deciding whether a workflow run is due
// ABOUTME: The owning driver calls run() and updates last_run; nothing here triggers runs

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// When a workflow is due to run. `should_run` is a pure function of the
/// schedule and the supplied clock; the driver owns `last_run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_type: ScheduleType,
    pub hour: u32,
    pub minute: u32,
    /// 0 = Monday, used by weekly schedules.
    pub day_of_week: u32,
    /// Clamped to 28 so every month has the scheduled day.
    pub day_of_month: u32,
    pub last_run: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn hourly() -> Self {
        Self::with_type(ScheduleType::Hourly, 0, 0)
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::with_type(ScheduleType::Daily, hour, minute)
    }

    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> Self {
        let mut schedule = Self::with_type(ScheduleType::Weekly, hour, minute);
        schedule.day_of_week = day_of_week.min(6);
        schedule
    }

    pub fn monthly(day_of_month: u32, hour: u32, minute: u32) -> Self {
        let mut schedule = Self::with_type(ScheduleType::Monthly, hour, minute);
        schedule.day_of_month = day_of_month.clamp(1, 28);
        schedule
    }

    fn with_type(schedule_type: ScheduleType, hour: u32, minute: u32) -> Self {
        Self {
            schedule_type,
            hour: hour.min(23),
            minute: minute.min(59),
            day_of_week: 0,
            day_of_month: 1,
            last_run: None,
        }
    }

    /// Whether a run is due at `now`. A schedule that has never run is
    /// always due.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        let Some(last_run) = self.last_run else {
            return true;
        };

        match self.schedule_type {
            ScheduleType::Hourly => now >= last_run + Duration::hours(1),
            ScheduleType::Daily => self.daily_due(last_run, now),
            ScheduleType::Weekly => self.weekly_due(last_run, now),
            ScheduleType::Monthly => self.monthly_due(last_run, now),
        }
    }

    /// Due once the scheduled instant of the current day has passed, unless
    /// the last run already covered it.
    fn daily_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.at_time(now.date_naive()) {
            Some(scheduled) => now >= scheduled && last_run < scheduled,
            None => false,
        }
    }

    fn weekly_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let last_weekday = last_run.weekday().num_days_from_monday() as i64;
        let mut days_ahead = self.day_of_week as i64 - last_weekday;
        if days_ahead <= 0 {
            days_ahead += 7;
        }

        last_run
            .date_naive()
            .checked_add_days(Days::new(days_ahead as u64))
            .and_then(|date| self.at_time(date))
            .is_some_and(|next_run| now >= next_run)
    }

    fn monthly_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (year, month) = if last_run.month() == 12 {
            (last_run.year() + 1, 1)
        } else {
            (last_run.year(), last_run.month() + 1)
        };

        NaiveDate::from_ymd_opt(year, month, self.day_of_month)
            .and_then(|date| self.at_time(date))
            .is_some_and(|next_run| now >= next_run)
    }

    fn at_time(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_opt(self.hour, self.minute, 0)
            .map(|instant| instant.and_utc())
    }
}
