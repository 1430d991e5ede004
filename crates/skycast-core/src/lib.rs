pub mod advisory;
pub mod agent;
pub mod cron;
pub mod error;
pub mod llm;
pub mod service;
pub mod tools;

// Re-export key types
pub use agent::{AgentLoop, AgentRunResult, RunOutcome};
pub use error::{Error, Result};
pub use service::{DailyReportJob, RunError, WeatherService};
pub use tools::ToolRegistry;
