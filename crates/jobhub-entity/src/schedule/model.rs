//! Job schedule entity model.

use chrono::{DateTime, Utc};
use jobhub_core::types::{JobId, ScheduleId};
use jobhub_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::rule::ScheduleRule;

/// A rule attached to a job, plus the bookkeeping of when it last and next fires.
///
/// `next_execution`, when set, lies inside `[start_date, end_date]`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobSchedule {
    pub id: ScheduleId,
    pub job_id: JobId,
    #[sqlx(json)]
    pub rule: ScheduleRule,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobSchedule {
    /// Create an active schedule. `next_execution` is left for the resolver to fill.
    pub fn new(
        job_id: JobId,
        rule: ScheduleRule,
        created_by: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        rule.validate()?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                return Err(AppError::validation(
                    "Schedule end date must not precede its start date",
                ));
            }
        }
        Ok(Self {
            id: ScheduleId::new(),
            job_id,
            rule,
            is_active: true,
            start_date,
            end_date,
            last_execution: None,
            next_execution: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_by: None,
            updated_at: now,
        })
    }

    pub fn is_within_active_window(&self, at: DateTime<Utc>) -> bool {
        if self.start_date.is_some_and(|start| at < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| at > end) {
            return false;
        }
        true
    }

    /// Active, inside its window, and its next occurrence has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.is_within_active_window(now)
            && self.next_execution.is_some_and(|next| next <= now)
    }

    /// Set the next occurrence, dropping it when it falls outside the window.
    pub fn set_next_execution(&mut self, next: Option<DateTime<Utc>>) {
        self.next_execution = next.filter(|at| self.is_within_active_window(*at));
    }

    pub fn record_execution(&mut self, at: DateTime<Utc>) {
        self.last_execution = Some(at);
    }

    /// Replace the rule. The next occurrence must be recomputed afterwards.
    pub fn update_rule(&mut self, rule: ScheduleRule, by: &str, now: DateTime<Utc>) -> AppResult<()> {
        rule.validate()?;
        self.rule = rule;
        self.next_execution = None;
        self.updated_by = Some(by.to_string());
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self) {
        self.is_active = true;
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime, TimeZone};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).single().expect("valid date")
    }

    fn schedule(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> JobSchedule {
        let rule = ScheduleRule::daily(NaiveTime::from_hms_opt(6, 0, 0).expect("valid time"));
        JobSchedule::new(JobId::new(), rule, "tests", start, end, at(1)).expect("valid schedule")
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let s = schedule(Some(at(5)), Some(at(10)));
        assert!(!s.is_within_active_window(at(4)));
        assert!(s.is_within_active_window(at(5)));
        assert!(s.is_within_active_window(at(10)));
        assert!(!s.is_within_active_window(at(10) + Duration::seconds(1)));
    }

    #[test]
    fn test_next_execution_outside_window_is_cleared() {
        let mut s = schedule(None, Some(at(10)));
        s.set_next_execution(Some(at(11)));
        assert!(s.next_execution.is_none());
        s.set_next_execution(Some(at(9)));
        assert_eq!(s.next_execution, Some(at(9)));
    }

    #[test]
    fn test_is_due() {
        let mut s = schedule(None, None);
        assert!(!s.is_due(at(2)));
        s.set_next_execution(Some(at(2)));
        assert!(s.is_due(at(2)));
        s.deactivate();
        assert!(!s.is_due(at(2)));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let rule = ScheduleRule::daily(NaiveTime::MIN);
        assert!(JobSchedule::new(JobId::new(), rule, "tests", Some(at(10)), Some(at(5)), at(1)).is_err());
    }
}
