//! Analytics period boundaries.
//!
//! A boundary narrows which event rows count toward a value, relative to the
//! reporting window. Boundaries can be shifted by a whole number of calendar
//! periods (days, weeks, months, quarters, years).

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// How the boundary relates to the reporting window.
///
/// Only the `AfterStart`/`BeforeEnd` pair produces SQL predicates; the other
/// two exist in host metadata and are skipped by the boundary compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundaryType {
    AfterStartOfReportingPeriod,
    BeforeEndOfReportingPeriod,
    BeforeStartOfReportingPeriod,
    AfterEndOfReportingPeriod,
}

/// The date column the boundary constrains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundaryTarget {
    EventDate,
    EnrollmentDate,
    IncidentDate,
    ScheduledDate,
    /// An opaque target such as `#{stage.dataElement}`; not resolved here.
    Custom(String),
}

/// Calendar unit for boundary offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// A signed offset of whole calendar periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOffset {
    pub period_type: PeriodType,
    pub periods: i32,
}

impl PeriodOffset {
    /// Shift `date` by this offset. Returns `None` on calendar overflow.
    pub fn apply(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.period_type {
            PeriodType::Daily => shift_days(date, self.periods),
            PeriodType::Weekly => shift_days(date, self.periods.checked_mul(7)?),
            PeriodType::Monthly => shift_months(date, self.periods),
            PeriodType::Quarterly => shift_months(date, self.periods.checked_mul(3)?),
            PeriodType::Yearly => shift_months(date, self.periods.checked_mul(12)?),
        }
    }
}

fn shift_days(date: NaiveDate, n: i32) -> Option<NaiveDate> {
    if n >= 0 {
        date.checked_add_days(Days::new(n as u64))
    } else {
        date.checked_sub_days(Days::new(u64::from(n.unsigned_abs())))
    }
}

fn shift_months(date: NaiveDate, n: i32) -> Option<NaiveDate> {
    if n >= 0 {
        date.checked_add_months(Months::new(n as u32))
    } else {
        date.checked_sub_months(Months::new(n.unsigned_abs()))
    }
}

/// A period boundary attached to a program indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsPeriodBoundary {
    pub boundary_type: BoundaryType,
    pub target: BoundaryTarget,
    #[serde(default)]
    pub offset: Option<PeriodOffset>,
}

impl AnalyticsPeriodBoundary {
    pub fn new(boundary_type: BoundaryType, target: BoundaryTarget) -> Self {
        Self {
            boundary_type,
            target,
            offset: None,
        }
    }

    pub fn with_offset(mut self, period_type: PeriodType, periods: i32) -> Self {
        self.offset = Some(PeriodOffset {
            period_type,
            periods,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_offset() {
        let offset = PeriodOffset {
            period_type: PeriodType::Daily,
            periods: 5,
        };
        assert_eq!(offset.apply(date(2023, 1, 1)), Some(date(2023, 1, 6)));
    }

    #[test]
    fn test_negative_daily_offset() {
        let offset = PeriodOffset {
            period_type: PeriodType::Daily,
            periods: -3,
        };
        assert_eq!(offset.apply(date(2023, 1, 1)), Some(date(2022, 12, 29)));
    }

    #[test]
    fn test_weekly_offset() {
        let offset = PeriodOffset {
            period_type: PeriodType::Weekly,
            periods: 2,
        };
        assert_eq!(offset.apply(date(2023, 1, 1)), Some(date(2023, 1, 15)));
    }

    #[test]
    fn test_monthly_offset_clamps_to_month_end() {
        let offset = PeriodOffset {
            period_type: PeriodType::Monthly,
            periods: 1,
        };
        assert_eq!(offset.apply(date(2023, 1, 31)), Some(date(2023, 2, 28)));
    }

    #[test]
    fn test_quarterly_and_yearly_offsets() {
        let quarterly = PeriodOffset {
            period_type: PeriodType::Quarterly,
            periods: 1,
        };
        assert_eq!(quarterly.apply(date(2023, 1, 15)), Some(date(2023, 4, 15)));

        let yearly = PeriodOffset {
            period_type: PeriodType::Yearly,
            periods: -1,
        };
        assert_eq!(yearly.apply(date(2023, 6, 30)), Some(date(2022, 6, 30)));
    }
}
