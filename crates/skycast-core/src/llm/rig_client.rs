use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, ToolResult, ToolResultContent, UserContent};
use rig::OneOrMany;
use tracing::{debug, warn};

use super::{ChatClient, ChatMessage, ChatRequest, Completion, ToolRequest};

/// [`ChatClient`] backed by a rig completion model.
#[allow(deprecated)]
pub struct RigChatClient {
    model: CompletionModelHandle<'static>,
    model_name: String,
    temperature: f64,
    timeout: Duration,
    max_retries: u32,
}

#[allow(deprecated)]
impl RigChatClient {
    pub fn new(
        model: CompletionModelHandle<'static>,
        model_name: impl Into<String>,
        temperature: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature,
            timeout,
            max_retries: 1,
        }
    }

    fn build_request(&self, request: &ChatRequest) -> Result<CompletionRequest> {
        let history: Vec<Message> = request.messages.iter().map(to_rig_message).collect();
        let chat_history = OneOrMany::many(history)
            .map_err(|_| anyhow::anyhow!("chat request has no messages"))?;

        Ok(CompletionRequest {
            preamble: Some(request.system_prompt.clone()),
            chat_history,
            documents: Vec::new(),
            tools: request.tools.clone(),
            temperature: Some(self.temperature),
            max_tokens: None,
            tool_choice: None,
            additional_params: None,
        })
    }
}

#[allow(deprecated)]
#[async_trait]
impl ChatClient for RigChatClient {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let mut attempt = 0;
        loop {
            let rig_request = self.build_request(request)?;
            let outcome = tokio::time::timeout(self.timeout, self.model.completion(rig_request)).await;

            let error = match outcome {
                Ok(Ok(response)) => return Ok(from_rig_choice(&response.choice)),
                Ok(Err(e)) => anyhow::anyhow!("LLM completion error: {e}"),
                Err(_) => anyhow::anyhow!(
                    "LLM completion timed out after {}s",
                    self.timeout.as_secs()
                ),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!("{error}; retrying ({attempt}/{})", self.max_retries);
        }
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message {
        ChatMessage::User(text) => Message::User {
            content: OneOrMany::one(UserContent::Text(Text { text: text.clone() })),
        },
        ChatMessage::Assistant {
            text,
            tool_requests,
        } => {
            let mut parts: Vec<AssistantContent> = Vec::new();
            if !text.is_empty() {
                parts.push(AssistantContent::Text(Text { text: text.clone() }));
            }
            for tr in tool_requests {
                parts.push(match &tr.call_id {
                    Some(call_id) => AssistantContent::tool_call_with_call_id(
                        tr.id.clone(),
                        call_id.clone(),
                        tr.name.clone(),
                        tr.arguments.clone(),
                    ),
                    None => {
                        AssistantContent::tool_call(tr.id.clone(), tr.name.clone(), tr.arguments.clone())
                    }
                });
            }
            Message::Assistant {
                id: None,
                content: OneOrMany::many(parts).unwrap_or_else(|_| {
                    OneOrMany::one(AssistantContent::Text(Text {
                        text: String::new(),
                    }))
                }),
            }
        }
        ChatMessage::ToolResults(results) => {
            let contents: Vec<UserContent> = results
                .iter()
                .map(|r| {
                    UserContent::ToolResult(ToolResult {
                        id: r.id.clone(),
                        call_id: r.call_id.clone(),
                        content: OneOrMany::one(ToolResultContent::Text(Text {
                            text: r.content.clone(),
                        })),
                    })
                })
                .collect();
            Message::User {
                content: OneOrMany::many(contents).unwrap_or_else(|_| {
                    OneOrMany::one(UserContent::Text(Text {
                        text: String::new(),
                    }))
                }),
            }
        }
    }
}

fn from_rig_choice(choice: &OneOrMany<AssistantContent>) -> Completion {
    let mut completion = Completion::default();
    for content in choice.iter() {
        match content {
            AssistantContent::Text(t) => completion.text.push_str(&t.text),
            AssistantContent::ToolCall(tc) => completion.tool_requests.push(ToolRequest {
                id: tc.id.clone(),
                call_id: tc.call_id.clone(),
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
            }),
            AssistantContent::Reasoning(r) => {
                debug!("Model reasoning: {}", r.reasoning.join(" "));
            }
            _ => {}
        }
    }
    completion
}
