use chrono::{Datelike, Days, Months, NaiveDate};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Which slice of log data a run extracts.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    #[display("none")]
    None,
    #[display("week")]
    Week,
    #[display("month")]
    Month,
}

impl FilterMode {
    /// Storage sub-directory used by log-archive destinations.
    pub fn storage_suffix(self) -> &'static str {
        match self {
            FilterMode::None => "full",
            FilterMode::Week => "weekly",
            FilterMode::Month => "monthly",
        }
    }
}

/// Inclusive calendar-date range, Monday to Sunday for weeks.
///
/// Only constructible through [`DateFilterWindow::week`] and
/// [`DateFilterWindow::month`], so `start <= end` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateFilterWindow {
    mode: FilterMode,
    start: NaiveDate,
    end: NaiveDate,
}

impl DateFilterWindow {
    pub fn week(reference: NaiveDate) -> Self {
        let week = reference.week(chrono::Weekday::Mon);
        Self {
            mode: FilterMode::Week,
            start: week.first_day(),
            end: week.last_day(),
        }
    }

    pub fn month(reference: NaiveDate) -> Self {
        let start = reference.with_day(1).unwrap_or(reference);
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.checked_sub_days(Days::new(1)))
            .unwrap_or(NaiveDate::MAX);
        Self {
            mode: FilterMode::Month,
            start,
            end,
        }
    }

    pub fn for_mode(mode: FilterMode, reference: NaiveDate) -> Option<Self> {
        match mode {
            FilterMode::None => None,
            FilterMode::Week => Some(Self::week(reference)),
            FilterMode::Month => Some(Self::month(reference)),
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Name a filtered dump is stored under, so different periods never collide.
    pub fn anchor_name(&self) -> String {
        match self.mode {
            FilterMode::Month => self.start.format("%Y-%m").to_string(),
            _ => self.start.format("%Y-%m-%d").to_string(),
        }
    }
}
