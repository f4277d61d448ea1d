//! Schedule entity and rule definitions.

pub mod model;
pub mod rule;

pub use model::JobSchedule;
pub use rule::{DaysOfWeek, ScheduleRule};
