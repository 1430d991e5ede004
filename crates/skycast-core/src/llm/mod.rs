//! Chat model abstraction and provider selection.
//!
//! The agent loop talks to the model only through [`ChatClient`], which keeps
//! the model an opaque capability: it receives the conversation plus tool
//! definitions and answers with text and/or tool requests.

pub mod rig_client;
pub mod selector;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;

pub use rig_client::RigChatClient;
pub use selector::{select_model, ModelSelection, ProviderSpec, DEFAULT_PROVIDER};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub call_id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of one tool invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    pub call_id: Option<String>,
    pub content: String,
}

/// One turn of the conversation (the system prompt travels separately).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User(String),
    Assistant {
        text: String,
        tool_requests: Vec<ToolRequest>,
    },
    ToolResults(Vec<ToolResponse>),
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// What the model answered: final text, tool requests, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_requests: Vec<ToolRequest>,
}

impl Completion {
    pub fn is_final(&self) -> bool {
        self.tool_requests.is_empty()
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Model name, for logging.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<Completion>;
}
