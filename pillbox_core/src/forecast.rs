//! Forward projection of the remaining pill count.
//!
//! A forecast is a lazy, restartable sequence of `(date, remaining)` points.
//! It depends only on the ledger values and the arguments it was created
//! with, so the same inputs always yield the same sequence.

use crate::{Error, LedgerState, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Longest gap between two matches of a calendar-based policy.
const CALENDAR_SEARCH_DAYS: u32 = 366;

/// Rule deciding on which dates the container is refilled to capacity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefillPolicy {
    /// Refill on a day of every month (clamped to the month's last day)
    Monthly { day: u32 },
    /// Refill once a year on a fixed calendar date
    Annually { month: u32, day: u32 },
    /// Refill every `days` days starting at `anchor`
    Interval { anchor: NaiveDate, days: u32 },
}

impl RefillPolicy {
    /// Reject policies that can never match a date.
    pub fn validate(&self) -> Result<()> {
        match *self {
            RefillPolicy::Monthly { day } => {
                if !(1..=31).contains(&day) {
                    return Err(Error::Validation(format!(
                        "refill day of month must be 1-31, got {}",
                        day
                    )));
                }
            }
            RefillPolicy::Annually { month, day } => {
                // 2000 is a leap year, so Feb 29 is accepted
                if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
                    return Err(Error::Validation(format!(
                        "invalid refill date {:02}-{:02}",
                        month, day
                    )));
                }
            }
            RefillPolicy::Interval { days, .. } => {
                if days == 0 {
                    return Err(Error::Validation(
                        "refill interval must be at least 1 day".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Does the container get refilled on `date`?
    pub fn is_refill_day(&self, date: NaiveDate) -> bool {
        match *self {
            RefillPolicy::Monthly { day } => {
                day >= 1 && date.day() == day.min(last_day_of_month(date.year(), date.month()))
            }
            RefillPolicy::Annually { month, day } => {
                date.month() == month
                    && day >= 1
                    && date.day() == day.min(last_day_of_month(date.year(), month))
            }
            RefillPolicy::Interval { anchor, days } => {
                let offset = (date - anchor).num_days();
                days > 0 && offset >= 0 && offset % i64::from(days) == 0
            }
        }
    }

    /// First refill date on or after `from`.
    pub fn next_on_or_after(&self, from: NaiveDate) -> Option<NaiveDate> {
        match *self {
            RefillPolicy::Interval { anchor, days } => {
                if days == 0 {
                    return None;
                }
                if from <= anchor {
                    return Some(anchor);
                }
                let offset = (from - anchor).num_days();
                let period = i64::from(days);
                let steps = (offset + period - 1) / period;
                anchor.checked_add_days(chrono::Days::new(u64::try_from(steps * period).ok()?))
            }
            _ => from
                .iter_days()
                .take(CALENDAR_SEARCH_DAYS as usize + 1)
                .find(|d| self.is_refill_day(*d)),
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// One projected day.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub remaining: u32,
}

/// Lazy day-by-day projection produced by [`LedgerState::project_forecast`].
///
/// Cloning a forecast restarts nothing: the clone continues from the same
/// point. Call `project_forecast` again to start over.
#[derive(Clone, Debug)]
pub struct Forecast {
    next_date: NaiveDate,
    remaining: u32,
    total_pills: u32,
    daily_dose: u32,
    refill: Option<RefillPolicy>,
    days_left: usize,
}

impl Iterator for Forecast {
    type Item = ForecastPoint;

    fn next(&mut self) -> Option<ForecastPoint> {
        if self.days_left == 0 {
            return None;
        }

        let date = self.next_date;
        if self.refill.is_some_and(|policy| policy.is_refill_day(date)) {
            self.remaining = self.total_pills;
        }

        let point = ForecastPoint {
            date,
            remaining: self.remaining,
        };

        self.remaining = self.remaining.saturating_sub(self.daily_dose);
        self.days_left -= 1;
        if let Some(next) = date.succ_opt() {
            self.next_date = next;
        }

        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.days_left, Some(self.days_left))
    }
}

impl ExactSizeIterator for Forecast {}

/// Supply figures derived alongside a forecast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupplyOutlook {
    pub days_remaining: u32,
    pub run_out_date: NaiveDate,
    pub next_refill: Option<NaiveDate>,
    /// `Some(true)` when the supply is exhausted before the next refill
    pub runs_out_before_refill: Option<bool>,
}

impl LedgerState {
    /// Project the remaining pill count over `horizon_days` days starting
    /// at `reference`.
    ///
    /// Fails if the last projected day is past the last representable date.
    pub fn project_forecast(
        &self,
        horizon_days: u32,
        reference: NaiveDate,
        refill: Option<RefillPolicy>,
    ) -> Result<Forecast> {
        let representable = (NaiveDate::MAX - reference).num_days().saturating_add(1);
        if i64::from(horizon_days) > representable {
            return Err(Error::Validation(format!(
                "forecast of {} days from {} runs past the last supported date",
                horizon_days, reference
            )));
        }

        Ok(Forecast {
            next_date: reference,
            remaining: self.pills_remaining,
            total_pills: self.config.total_pills(),
            daily_dose: self.config.daily_dose(),
            refill,
            days_left: horizon_days as usize,
        })
    }

    pub fn outlook(&self, reference: NaiveDate, refill: Option<RefillPolicy>) -> SupplyOutlook {
        let days_remaining = self.days_remaining();
        let run_out_date = self.run_out_date(reference);
        let next_refill = refill.and_then(|policy| policy.next_on_or_after(reference));

        SupplyOutlook {
            days_remaining,
            run_out_date,
            next_refill,
            runs_out_before_refill: next_refill.map(|refill_date| run_out_date < refill_date),
        }
    }
}
