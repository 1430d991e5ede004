pub mod client;
pub mod protocol;

pub use client::{McpClient, McpTool};
pub use protocol::{CallToolResult, McpToolInfo};
