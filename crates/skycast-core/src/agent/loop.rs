use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::llm::{ChatClient, ChatMessage, ChatRequest, ToolRequest, ToolResponse};
use crate::tools::ToolRegistry;

/// Reply used when the model finishes without any text.
const EMPTY_FINAL_MESSAGE: &str = "任务已执行完毕，但模型未返回说明。";

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn preview(s: &str, max: usize) -> String {
    if s.len() > max {
        let end = floor_char_boundary(s, max);
        format!("{}... ({} chars)", &s[..end], s.len())
    } else {
        s.to_string()
    }
}

/// One tool call made during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
    /// Tool output, or the error text for a failed call.
    pub output: String,
    pub succeeded: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed(Error),
}

/// Result of one orchestration run. Logged, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunResult {
    pub run_id: String,
    /// The model's final answer, or the error text when the run failed.
    pub final_message: String,
    pub trace: Vec<ToolInvocation>,
    pub outcome: RunOutcome,
}

impl AgentRunResult {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub fn tools_used(&self) -> Vec<&str> {
        self.trace.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            RunOutcome::Failed(e) => Some(e),
            RunOutcome::Completed => None,
        }
    }
}

/// Binds a chat model to a fixed tool set.
///
/// Each run sends the system and user prompts plus every tool definition,
/// executes the tools the model asks for and feeds their results back until
/// the model answers without tool requests. Any tool failure ends the run.
pub struct AgentLoop {
    client: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl AgentLoop {
    pub fn new(client: Arc<dyn ChatClient>, tools: Arc<ToolRegistry>, max_iterations: usize) -> Self {
        Self {
            client,
            tools,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    pub async fn run(&self, system_prompt: &str, user_prompt: &str) -> AgentRunResult {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut trace = Vec::new();

        info!(
            "Agent run {run_id} started: model={}, tools=[{}]",
            self.client.model_name(),
            self.tools.names().join(", ")
        );

        let outcome = self
            .run_loop(system_prompt, user_prompt, &mut trace)
            .await;

        let (final_message, outcome) = match outcome {
            Ok(text) => {
                info!("Agent run {run_id} completed after {} tool call(s)", trace.len());
                (text, RunOutcome::Completed)
            }
            Err(e) => {
                warn!("Agent run {run_id} failed: {e}");
                (e.to_string(), RunOutcome::Failed(e))
            }
        };

        AgentRunResult {
            run_id,
            final_message,
            trace,
            outcome,
        }
    }

    async fn run_loop(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        trace: &mut Vec<ToolInvocation>,
    ) -> Result<String, Error> {
        let mut request = ChatRequest {
            system_prompt: system_prompt.to_string(),
            messages: vec![ChatMessage::User(user_prompt.to_string())],
            tools: self.tools.definitions(),
        };

        for iteration in 0..self.max_iterations {
            debug!(
                "LLM request [{}/{}]: {} messages, {} tools",
                iteration + 1,
                self.max_iterations,
                request.messages.len(),
                request.tools.len()
            );

            let llm_start = Instant::now();
            let completion = self
                .client
                .complete(&request)
                .await
                .map_err(|e| Error::Model(format!("{e:#}")))?;
            let llm_elapsed = llm_start.elapsed();

            if completion.is_final() {
                debug!(
                    "LLM response [{}/{}]: text ({} chars) in {:.1}s",
                    iteration + 1,
                    self.max_iterations,
                    completion.text.len(),
                    llm_elapsed.as_secs_f64()
                );
                let text = completion.text.trim();
                return Ok(if text.is_empty() {
                    EMPTY_FINAL_MESSAGE.to_string()
                } else {
                    text.to_string()
                });
            }

            debug!(
                "LLM response [{}/{}]: {} tool call(s) in {:.1}s",
                iteration + 1,
                self.max_iterations,
                completion.tool_requests.len(),
                llm_elapsed.as_secs_f64()
            );

            let mut responses = Vec::with_capacity(completion.tool_requests.len());
            for call in &completion.tool_requests {
                info!(
                    "Tool call [{}/{}]: {}({})",
                    iteration + 1,
                    self.max_iterations,
                    call.name,
                    preview(&call.arguments.to_string(), 200)
                );
                let output = self.invoke(call, trace).await?;
                responses.push(ToolResponse {
                    id: call.id.clone(),
                    call_id: call.call_id.clone(),
                    content: output,
                });
            }

            request.messages.push(ChatMessage::Assistant {
                text: completion.text,
                tool_requests: completion.tool_requests,
            });
            request.messages.push(ChatMessage::ToolResults(responses));
        }

        warn!(
            "Agent loop reached max iterations ({}) without final response",
            self.max_iterations
        );
        Err(Error::IterationLimit(self.max_iterations))
    }

    /// Execute one requested tool, recording it in `trace`.
    async fn invoke(
        &self,
        call: &ToolRequest,
        trace: &mut Vec<ToolInvocation>,
    ) -> Result<String, Error> {
        if self.tools.get(&call.name).is_none() {
            warn!("Model requested unknown tool '{}'", call.name);
            return Err(Error::UnknownTool(call.name.clone()));
        }

        let start = Instant::now();
        let result = self.tools.execute(&call.name, call.arguments.clone()).await;
        let elapsed = start.elapsed();

        match result {
            Ok(output) => {
                debug!("Tool result [{}]: {}", call.name, preview(&output, 200));
                trace.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output: output.clone(),
                    succeeded: true,
                    elapsed,
                });
                Ok(output)
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!("Tool '{}' failed: {message}", call.name);
                trace.push(ToolInvocation {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output: message.clone(),
                    succeeded: false,
                    elapsed,
                });
                Err(Error::ToolInvocation {
                    tool: call.name.clone(),
                    message,
                })
            }
        }
    }
}
