//! Schedule rule value object.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Bit mask of weekdays. Sunday is bit 0, Saturday bit 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaysOfWeek(u8);

impl DaysOfWeek {
    pub const NONE: Self = Self(0);
    pub const SUNDAY: Self = Self(1);
    pub const MONDAY: Self = Self(2);
    pub const TUESDAY: Self = Self(4);
    pub const WEDNESDAY: Self = Self(8);
    pub const THURSDAY: Self = Self(16);
    pub const FRIDAY: Self = Self(32);
    pub const SATURDAY: Self = Self(64);
    pub const WEEKDAYS: Self = Self(2 | 4 | 8 | 16 | 32);
    pub const WEEKEND: Self = Self(1 | 64);
    pub const ALL: Self = Self(127);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_weekdays(days: &[Weekday]) -> Self {
        days.iter().fold(Self::NONE, |acc, d| acc | Self::from(*d))
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::from(day).0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<Weekday> for DaysOfWeek {
    fn from(day: Weekday) -> Self {
        Self(1 << day.num_days_from_sunday())
    }
}

impl std::ops::BitOr for DaysOfWeek {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// When a schedule fires.
///
/// Times of day are interpreted in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleRule {
    /// Every day at `time_of_day`.
    Daily { time_of_day: NaiveTime },
    /// On each selected weekday at `time_of_day`.
    Weekly {
        days_of_week: DaysOfWeek,
        time_of_day: NaiveTime,
    },
    /// On `day_of_month`, clamped to the month's last day.
    Monthly {
        day_of_month: u32,
        time_of_day: NaiveTime,
    },
    /// On the Nth business day of the month.
    MonthlyBusinessDay {
        business_day_of_month: u32,
        time_of_day: NaiveTime,
        #[serde(default)]
        adjust_to_previous_business_day: bool,
    },
    /// Standard cron expression (5, 6, or 7 fields).
    Cron { expression: String },
    /// Exactly once.
    OneTime { execute_at: DateTime<Utc> },
    /// Daily at `time_of_day` on days where `expression` holds.
    Conditional {
        expression: String,
        time_of_day: NaiveTime,
    },
}

impl ScheduleRule {
    pub fn daily(time_of_day: NaiveTime) -> Self {
        Self::Daily { time_of_day }
    }

    pub fn weekly(days_of_week: DaysOfWeek, time_of_day: NaiveTime) -> AppResult<Self> {
        let rule = Self::Weekly {
            days_of_week,
            time_of_day,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn monthly(day_of_month: u32, time_of_day: NaiveTime) -> AppResult<Self> {
        let rule = Self::Monthly {
            day_of_month,
            time_of_day,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn monthly_business_day(
        business_day_of_month: u32,
        time_of_day: NaiveTime,
        adjust_to_previous_business_day: bool,
    ) -> AppResult<Self> {
        let rule = Self::MonthlyBusinessDay {
            business_day_of_month,
            time_of_day,
            adjust_to_previous_business_day,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn cron(expression: impl Into<String>) -> AppResult<Self> {
        let rule = Self::Cron {
            expression: expression.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn one_time(execute_at: DateTime<Utc>) -> Self {
        Self::OneTime { execute_at }
    }

    pub fn conditional(expression: impl Into<String>, time_of_day: NaiveTime) -> AppResult<Self> {
        let rule = Self::Conditional {
            expression: expression.into(),
            time_of_day,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check the per-variant field ranges.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Self::Weekly { days_of_week, .. } if days_of_week.is_empty() => Err(
                AppError::validation("Weekly schedule needs at least one day of week"),
            ),
            Self::Monthly { day_of_month, .. } if !(1..=31).contains(day_of_month) => Err(
                AppError::validation("Day of month must be between 1 and 31"),
            ),
            Self::MonthlyBusinessDay {
                business_day_of_month,
                ..
            } if !(1..=31).contains(business_day_of_month) => Err(AppError::validation(
                "Business day of month must be between 1 and 31",
            )),
            Self::Cron { expression } if expression.trim().is_empty() => {
                Err(AppError::validation("Cron expression cannot be empty"))
            }
            Self::Conditional { expression, .. } if expression.trim().is_empty() => Err(
                AppError::validation("Conditional expression cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Short name of the rule variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
            Self::MonthlyBusinessDay { .. } => "monthly_business_day",
            Self::Cron { .. } => "cron",
            Self::OneTime { .. } => "one_time",
            Self::Conditional { .. } => "conditional",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).expect("valid time")
    }

    #[test]
    fn test_days_of_week_bits() {
        assert_eq!(DaysOfWeek::from(Weekday::Sun).bits(), 1);
        assert_eq!(DaysOfWeek::from(Weekday::Mon).bits(), 2);
        assert_eq!(DaysOfWeek::from(Weekday::Sat).bits(), 64);
        let mask = DaysOfWeek::from_weekdays(&[Weekday::Mon, Weekday::Fri]);
        assert!(mask.contains(Weekday::Fri));
        assert!(!mask.contains(Weekday::Tue));
        assert_eq!(DaysOfWeek::WEEKDAYS | DaysOfWeek::WEEKEND, DaysOfWeek::ALL);
    }

    #[test]
    fn test_validation() {
        assert!(ScheduleRule::monthly(0, nine()).is_err());
        assert!(ScheduleRule::monthly(32, nine()).is_err());
        assert!(ScheduleRule::monthly(31, nine()).is_ok());
        assert!(ScheduleRule::monthly_business_day(0, nine(), false).is_err());
        assert!(ScheduleRule::cron("  ").is_err());
        assert!(ScheduleRule::conditional("", nine()).is_err());
        assert!(ScheduleRule::weekly(DaysOfWeek::NONE, nine()).is_err());
    }

    #[test]
    fn test_serde_tagged() {
        let rule = ScheduleRule::monthly_business_day(3, nine(), true).expect("valid");
        let json = serde_json::to_value(&rule).expect("serialize");
        assert_eq!(json["type"], "monthly_business_day");
        assert_eq!(json["business_day_of_month"], 3);
        let back: ScheduleRule = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, rule);
    }
}
