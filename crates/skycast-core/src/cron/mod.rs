pub mod service;
pub mod types;

pub use service::{CronService, Job};
pub use types::{DailySchedule, FireDecision};
