use thiserror::Error;

/// Failure categories of the weather push pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A required credential, URL or schedule value is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The chat model client could not be constructed.
    #[error("model initialization failed: {0}")]
    Initialization(String),

    /// The remote tool host was unreachable or returned a malformed tool list.
    #[error("tool discovery failed: {0}")]
    ToolDiscovery(String),

    /// A tool call failed or reported an error payload during a run.
    #[error("tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// The model asked for a tool that is not in the registry.
    #[error("model requested unknown tool '{0}'")]
    UnknownTool(String),

    /// A webhook push attempt failed.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The chat completion call failed.
    #[error("model call failed: {0}")]
    Model(String),

    /// The model kept requesting tools past the iteration cap.
    #[error("no final answer after {0} model calls")]
    IterationLimit(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
