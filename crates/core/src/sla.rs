//! Business-day arithmetic for SLA due dates.
//!
//! Everything here is pure: the same start date, day count, and calendar
//! always produce the same result, which lets the shift propagator replay it
//! per job without coordination.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
    /// Recurring holidays fall on the same month and day every year.
    pub recurring: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    fixed: BTreeSet<NaiveDate>,
    recurring: BTreeSet<(u32, u32)>,
}

impl HolidayCalendar {
    pub fn new(holidays: impl IntoIterator<Item = Holiday>) -> Self {
        let mut calendar = Self::default();
        for holiday in holidays {
            if holiday.recurring {
                calendar.recurring.insert((holiday.date.month(), holiday.date.day()));
            } else {
                calendar.fixed.insert(holiday.date);
            }
        }
        calendar
    }

    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self { fixed: dates.into_iter().collect(), recurring: BTreeSet::new() }
    }

    pub fn with_recurring(mut self, month: u32, day: u32) -> Self {
        self.recurring.insert((month, day));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.recurring.is_empty()
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        if self.fixed.contains(&date) {
            return true;
        }

        self.recurring.iter().any(|(month, day)| {
            NaiveDate::from_ymd_opt(date.year(), *month, *day)
                .is_some_and(|resolved| resolved == date)
        })
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.is_holiday(date)
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Advances `start` by exactly `days` business days. Zero days returns
/// `start` as-is, even when it is not itself a business day.
pub fn add_working_days(start: NaiveDate, days: u32, calendar: &HolidayCalendar) -> NaiveDate {
    let mut current = start;
    let mut remaining = days;

    while remaining > 0 {
        let Some(next) = current.succ_opt() else {
            break;
        };
        current = next;
        if calendar.is_business_day(current) {
            remaining -= 1;
        }
    }

    current
}

/// Business days in `(from, to]`; negative when `to` precedes `from`.
pub fn working_days_between(from: NaiveDate, to: NaiveDate, calendar: &HolidayCalendar) -> i64 {
    let (low, high, sign) = if to >= from { (from, to, 1) } else { (to, from, -1) };

    let count = low
        .iter_days()
        .skip(1)
        .take_while(|date| *date <= high)
        .filter(|date| calendar.is_business_day(*date))
        .count() as i64;

    count * sign
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    OnTrack,
    DueSoon,
    Overdue,
}

pub fn sla_status(
    due_date: NaiveDate,
    today: NaiveDate,
    due_soon_days: u32,
    calendar: &HolidayCalendar,
) -> SlaStatus {
    if today > due_date {
        return SlaStatus::Overdue;
    }

    if working_days_between(today, due_date, calendar) <= i64::from(due_soon_days) {
        SlaStatus::DueSoon
    } else {
        SlaStatus::OnTrack
    }
}
