//! Next-occurrence computation for schedule rules.
//!
//! All arithmetic is in UTC. Every rule returns the first occurrence
//! strictly after `from`, or `None` when the rule has no further
//! occurrence.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc, Weekday};

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_entity::schedule::{DaysOfWeek, JobSchedule, ScheduleRule};

/// How many days ahead a conditional rule is evaluated before giving up.
const CONDITION_LOOKAHEAD_DAYS: u64 = 366;

/// Months scanned for a business-day rule whose Nth business day does not
/// exist in the current month.
const BUSINESS_DAY_LOOKAHEAD_MONTHS: u32 = 12;

/// Decides whether a conditional schedule fires on a given day.
pub trait ConditionEvaluator: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, expression: &str, day: NaiveDate) -> AppResult<bool>;
}

/// Resolves rules against a holiday calendar and an optional condition hook.
#[derive(Debug, Clone, Default)]
pub struct ScheduleResolver {
    holidays: HashSet<NaiveDate>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
}

impl ScheduleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Not a weekend day and not a configured holiday.
    pub fn is_business_day(&self, day: NaiveDate) -> bool {
        !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&day)
    }

    /// Next occurrence of `rule` strictly after `from`.
    pub fn next_execution(
        &self,
        rule: &ScheduleRule,
        from: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        match rule {
            ScheduleRule::Daily { time_of_day } => Ok(Some(next_daily(*time_of_day, from))),
            ScheduleRule::Weekly {
                days_of_week,
                time_of_day,
            } => Ok(next_weekly(*days_of_week, *time_of_day, from)),
            ScheduleRule::Monthly {
                day_of_month,
                time_of_day,
            } => Ok(next_monthly(*day_of_month, *time_of_day, from)),
            ScheduleRule::MonthlyBusinessDay {
                business_day_of_month,
                time_of_day,
                adjust_to_previous_business_day,
            } => Ok(self.next_business_day(
                *business_day_of_month,
                *time_of_day,
                *adjust_to_previous_business_day,
                from,
            )),
            ScheduleRule::Cron { expression } => next_cron(expression, from),
            ScheduleRule::OneTime { execute_at } => Ok((*execute_at > from).then_some(*execute_at)),
            ScheduleRule::Conditional {
                expression,
                time_of_day,
            } => self.next_conditional(expression, *time_of_day, from),
        }
    }

    /// Next occurrence of a schedule, honouring its activity window.
    ///
    /// `None` when `from` lies outside the window or the occurrence would
    /// land after `end_date`.
    pub fn next_for_schedule(
        &self,
        schedule: &JobSchedule,
        from: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        if !schedule.is_within_active_window(from) {
            return Ok(None);
        }
        let next = self.next_execution(&schedule.rule, from)?;
        Ok(next.filter(|at| schedule.is_within_active_window(*at)))
    }

    /// First occurrence of a newly created or edited schedule.
    ///
    /// Resolves from the window start when that is still in the future.
    pub fn first_for_schedule(
        &self,
        schedule: &JobSchedule,
        now: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        match schedule.start_date {
            Some(start) if start > now => {
                let next = self.next_execution(&schedule.rule, start - chrono::Duration::seconds(1))?;
                Ok(next.filter(|at| schedule.is_within_active_window(*at)))
            }
            _ => self.next_for_schedule(schedule, now),
        }
    }

    fn next_business_day(
        &self,
        nth: u32,
        time_of_day: NaiveTime,
        adjust_to_previous: bool,
        from: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let (mut year, mut month) = (from.year(), from.month());
        for _ in 0..=BUSINESS_DAY_LOOKAHEAD_MONTHS {
            if let Some(day) = self.nth_business_day(year, month, nth, adjust_to_previous) {
                let candidate = at(day, time_of_day);
                if candidate > from {
                    return Some(candidate);
                }
            }
            (year, month) = next_month(year, month);
        }
        None
    }

    /// The Nth business day of the month. When the month runs out first,
    /// either the last business day (`adjust_to_previous`) or nothing.
    fn nth_business_day(
        &self,
        year: i32,
        month: u32,
        nth: u32,
        adjust_to_previous: bool,
    ) -> Option<NaiveDate> {
        let last = last_day_of_month(year, month)?;
        let mut count = 0;
        let mut day = NaiveDate::from_ymd_opt(year, month, 1)?;
        while day <= last {
            if self.is_business_day(day) {
                count += 1;
                if count == nth {
                    return Some(day);
                }
            }
            day = day.succ_opt()?;
        }
        if !adjust_to_previous {
            return None;
        }
        let mut day = last;
        while !self.is_business_day(day) {
            day = day.pred_opt()?;
            if day.month() != month {
                return None;
            }
        }
        Some(day)
    }

    fn next_conditional(
        &self,
        expression: &str,
        time_of_day: NaiveTime,
        from: DateTime<Utc>,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let today = from.date_naive();
        let Some(evaluator) = &self.evaluator else {
            return Ok(today.checked_add_days(Days::new(1)).map(|d| at(d, time_of_day)));
        };
        for offset in 1..=CONDITION_LOOKAHEAD_DAYS {
            let Some(day) = today.checked_add_days(Days::new(offset)) else {
                return Ok(None);
            };
            let holds = evaluator.evaluate(expression, day).map_err(|e| {
                AppError::schedule(format!("Condition '{expression}' failed for {day}: {e}"))
            })?;
            if holds {
                return Ok(Some(at(day, time_of_day)));
            }
        }
        Ok(None)
    }
}

fn at(day: NaiveDate, time_of_day: NaiveTime) -> DateTime<Utc> {
    day.and_time(time_of_day).and_utc()
}

fn next_daily(time_of_day: NaiveTime, from: DateTime<Utc>) -> DateTime<Utc> {
    let today = at(from.date_naive(), time_of_day);
    if today > from {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Scans today and the following seven days so a single-day mask always
/// finds next week's slot once today's has passed.
fn next_weekly(days: DaysOfWeek, time_of_day: NaiveTime, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let today = from.date_naive();
    (0..=7)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|day| days.contains(day.weekday()))
        .map(|day| at(day, time_of_day))
        .find(|candidate| *candidate > from)
}

fn next_monthly(day_of_month: u32, time_of_day: NaiveTime, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = (from.year(), from.month());
    let this_month = clamped_day(year, month, day_of_month).map(|d| at(d, time_of_day))?;
    if this_month > from {
        return Some(this_month);
    }
    let (year, month) = next_month(year, month);
    clamped_day(year, month, day_of_month).map(|d| at(d, time_of_day))
}

fn next_cron(expression: &str, from: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    let normalized = normalize_cron(expression);
    let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
        AppError::schedule(format!("Invalid cron expression '{expression}': {e}"))
    })?;
    Ok(schedule.after(&from).next())
}

/// Five-field expressions get a leading seconds field.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next, 1)?.pred_opt()
}

fn clamped_day(year: i32, month: u32, day_of_month: u32) -> Option<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day_of_month.min(last.day()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobhub_core::error::ErrorKind;
    use jobhub_core::types::JobId;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid instant")
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).expect("valid time")
    }

    fn next(rule: &ScheduleRule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        ScheduleResolver::new().next_execution(rule, from).expect("resolves")
    }

    #[derive(Debug)]
    struct FridaysOnly;

    impl ConditionEvaluator for FridaysOnly {
        fn evaluate(&self, _expression: &str, day: NaiveDate) -> AppResult<bool> {
            Ok(day.weekday() == Weekday::Fri)
        }
    }

    #[derive(Debug)]
    struct Never;

    impl ConditionEvaluator for Never {
        fn evaluate(&self, _expression: &str, _day: NaiveDate) -> AppResult<bool> {
            Ok(false)
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl ConditionEvaluator for Broken {
        fn evaluate(&self, expression: &str, _day: NaiveDate) -> AppResult<bool> {
            Err(AppError::internal(format!("unknown variable in '{expression}'")))
        }
    }

    #[test]
    fn test_daily_is_strictly_after_from() {
        let rule = ScheduleRule::daily(nine());
        assert_eq!(next(&rule, utc(2025, 3, 5, 8, 0)), Some(utc(2025, 3, 5, 9, 0)));
        assert_eq!(next(&rule, utc(2025, 3, 5, 9, 0)), Some(utc(2025, 3, 6, 9, 0)));
        assert_eq!(next(&rule, utc(2025, 12, 31, 23, 0)), Some(utc(2026, 1, 1, 9, 0)));
    }

    #[test]
    fn test_weekly_rolls_to_next_matching_day() {
        let mondays = ScheduleRule::weekly(DaysOfWeek::MONDAY, nine()).expect("valid");
        // 2025-03-05 is a Wednesday.
        assert_eq!(next(&mondays, utc(2025, 3, 5, 12, 0)), Some(utc(2025, 3, 10, 9, 0)));
        assert_eq!(next(&mondays, utc(2025, 3, 10, 9, 0)), Some(utc(2025, 3, 17, 9, 0)));

        let weekdays = ScheduleRule::weekly(DaysOfWeek::WEEKDAYS, nine()).expect("valid");
        assert_eq!(next(&weekdays, utc(2025, 3, 7, 10, 0)), Some(utc(2025, 3, 10, 9, 0)));
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let rule = ScheduleRule::monthly(31, nine()).expect("valid");
        assert_eq!(next(&rule, utc(2025, 2, 10, 0, 0)), Some(utc(2025, 2, 28, 9, 0)));
        assert_eq!(next(&rule, utc(2025, 2, 28, 10, 0)), Some(utc(2025, 3, 31, 9, 0)));
        assert_eq!(next(&rule, utc(2024, 2, 1, 0, 0)), Some(utc(2024, 2, 29, 9, 0)));
        assert_eq!(next(&rule, utc(2025, 12, 31, 9, 0)), Some(utc(2026, 1, 31, 9, 0)));
    }

    #[test]
    fn test_business_day_skips_weekends_and_holidays() {
        let third = ScheduleRule::monthly_business_day(3, nine(), false).expect("valid");
        // March 2025 starts on a Saturday.
        assert_eq!(next(&third, utc(2025, 3, 1, 0, 0)), Some(utc(2025, 3, 5, 9, 0)));

        let holiday = NaiveDate::from_ymd_opt(2025, 3, 3).expect("valid date");
        let resolver = ScheduleResolver::new().with_holidays([holiday]);
        assert!(!resolver.is_business_day(holiday));
        assert_eq!(
            resolver.next_execution(&third, utc(2025, 3, 1, 0, 0)).expect("resolves"),
            Some(utc(2025, 3, 6, 9, 0))
        );

        assert_eq!(next(&third, utc(2025, 3, 5, 9, 0)), Some(utc(2025, 4, 3, 9, 0)));
    }

    #[test]
    fn test_business_day_past_month_end() {
        // March 2025 has 21 business days, April has 22.
        let strict = ScheduleRule::monthly_business_day(22, nine(), false).expect("valid");
        assert_eq!(next(&strict, utc(2025, 3, 1, 0, 0)), Some(utc(2025, 4, 30, 9, 0)));

        let adjusted = ScheduleRule::monthly_business_day(22, nine(), true).expect("valid");
        assert_eq!(next(&adjusted, utc(2025, 3, 1, 0, 0)), Some(utc(2025, 3, 31, 9, 0)));

        let impossible = ScheduleRule::monthly_business_day(31, nine(), false).expect("valid");
        assert_eq!(next(&impossible, utc(2025, 3, 1, 0, 0)), None);
    }

    #[test]
    fn test_cron_accepts_five_and_six_fields() {
        let five = ScheduleRule::cron("*/15 * * * *").expect("valid");
        assert_eq!(next(&five, utc(2025, 3, 5, 10, 7)), Some(utc(2025, 3, 5, 10, 15)));
        assert_eq!(next(&five, utc(2025, 3, 5, 10, 15)), Some(utc(2025, 3, 5, 10, 30)));

        let six = ScheduleRule::cron("0 30 9 * * *").expect("valid");
        assert_eq!(next(&six, utc(2025, 3, 5, 10, 0)), Some(utc(2025, 3, 6, 9, 30)));
    }

    #[test]
    fn test_malformed_cron_is_an_error() {
        let rule = ScheduleRule::cron("every tuesday").expect("non-empty");
        let err = ScheduleResolver::new()
            .next_execution(&rule, utc(2025, 3, 5, 0, 0))
            .expect_err("unparseable");
        assert_eq!(err.kind, ErrorKind::Schedule);
    }

    #[test]
    fn test_one_time_fires_once() {
        let when = utc(2025, 6, 1, 12, 0);
        let rule = ScheduleRule::one_time(when);
        assert_eq!(next(&rule, utc(2025, 5, 1, 0, 0)), Some(when));
        assert_eq!(next(&rule, when), None);
    }

    #[test]
    fn test_conditional_without_evaluator_is_next_day() {
        let rule = ScheduleRule::conditional("inventory_low", nine()).expect("valid");
        assert_eq!(next(&rule, utc(2025, 3, 5, 8, 0)), Some(utc(2025, 3, 6, 9, 0)));
    }

    #[test]
    fn test_conditional_consults_evaluator() {
        let rule = ScheduleRule::conditional("is_friday", nine()).expect("valid");
        let resolver = ScheduleResolver::new().with_condition_evaluator(Arc::new(FridaysOnly));
        assert_eq!(
            resolver.next_execution(&rule, utc(2025, 3, 5, 8, 0)).expect("resolves"),
            Some(utc(2025, 3, 7, 9, 0))
        );

        let never = ScheduleResolver::new().with_condition_evaluator(Arc::new(Never));
        assert_eq!(never.next_execution(&rule, utc(2025, 3, 5, 8, 0)).expect("resolves"), None);

        let broken = ScheduleResolver::new().with_condition_evaluator(Arc::new(Broken));
        let err = broken
            .next_execution(&rule, utc(2025, 3, 5, 8, 0))
            .expect_err("evaluator failure surfaces");
        assert_eq!(err.kind, ErrorKind::Schedule);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = ScheduleResolver::new();
        let from = utc(2025, 3, 5, 8, 0);
        for rule in [
            ScheduleRule::daily(nine()),
            ScheduleRule::monthly(15, nine()).expect("valid"),
            ScheduleRule::cron("0 0 * * 1").expect("valid"),
        ] {
            assert_eq!(
                resolver.next_execution(&rule, from).expect("resolves"),
                resolver.next_execution(&rule, from).expect("resolves")
            );
        }
    }

    #[test]
    fn test_schedule_window_is_enforced() {
        let rule = ScheduleRule::daily(nine());
        let schedule = JobSchedule::new(
            JobId::new(),
            rule,
            "tests",
            Some(utc(2025, 3, 1, 0, 0)),
            Some(utc(2025, 3, 10, 0, 0)),
            utc(2025, 2, 1, 0, 0),
        )
        .expect("valid schedule");
        let resolver = ScheduleResolver::new();

        assert_eq!(resolver.next_for_schedule(&schedule, utc(2025, 2, 20, 0, 0)).expect("ok"), None);
        assert_eq!(
            resolver.next_for_schedule(&schedule, utc(2025, 3, 5, 10, 0)).expect("ok"),
            Some(utc(2025, 3, 6, 9, 0))
        );
        assert_eq!(resolver.next_for_schedule(&schedule, utc(2025, 3, 9, 10, 0)).expect("ok"), None);
        assert_eq!(
            resolver.first_for_schedule(&schedule, utc(2025, 2, 20, 0, 0)).expect("ok"),
            Some(utc(2025, 3, 1, 9, 0))
        );
    }
}
