//! Streamable HTTP MCP client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use skycast_config::AmapConfig;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::protocol::{
    parse_sse_messages, CallToolResult, ListToolsResult, McpNotification, McpRequest,
    McpResponse, McpToolInfo,
};
use crate::error::Error;
use crate::tools::Tool;

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Upper bound on `tools/list` pages, in case a server keeps returning cursors.
const MAX_LIST_PAGES: usize = 20;

pub struct McpClient {
    server_url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl McpClient {
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to create MCP HTTP client")?;
        Ok(Self {
            server_url: server_url.into(),
            http_client,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        })
    }

    /// Client for the AMap MCP endpoint, authenticated by the `key` query
    /// parameter.
    pub fn for_amap(config: &AmapConfig) -> std::result::Result<Self, Error> {
        let key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Configuration("AMAP_API_KEY is not configured".into()))?;
        let url = url::Url::parse_with_params(&config.mcp_url, &[("key", key)]).map_err(|e| {
            Error::Configuration(format!("invalid MCP url '{}': {e}", config.mcp_url))
        })?;
        Self::new(url.to_string(), Duration::from_secs(config.timeout_secs))
            .map_err(|e| Error::Configuration(format!("{e:#}")))
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Perform the `initialize` handshake and confirm with
    /// `notifications/initialized`.
    pub async fn connect(&self) -> Result<()> {
        let result = self
            .request(McpRequest::initialize(self.next_request_id()))
            .await
            .context("MCP initialize failed")?;
        let server = result
            .get("serverInfo")
            .and_then(|s| s.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown");
        info!("Connected to MCP server '{server}'");
        self.notify(McpNotification::initialized()).await
    }

    /// List all tools, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let result = self
                .request(McpRequest::list_tools(
                    self.next_request_id(),
                    cursor.as_deref(),
                ))
                .await
                .context("MCP tools/list failed")?;
            let page: ListToolsResult =
                serde_json::from_value(result).context("malformed MCP tool list")?;
            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
        anyhow::bail!("MCP tools/list did not finish after {MAX_LIST_PAGES} pages")
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<CallToolResult> {
        let result = self
            .request(McpRequest::call_tool(self.next_request_id(), name, arguments))
            .await?;
        serde_json::from_value(result).context("malformed MCP tool result")
    }

    /// Send a request and return its `result`, mapping JSON-RPC errors.
    async fn request(&self, request: McpRequest) -> Result<serde_json::Value> {
        let id = request.id;
        debug!("MCP request #{id}: {}", request.method);

        let response = self.post(&request).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.context("failed to read MCP response")?;

        let message: McpResponse = if content_type.starts_with("text/event-stream") {
            parse_sse_messages(&body)
                .into_iter()
                .filter_map(|v| serde_json::from_value::<McpResponse>(v).ok())
                .find(|m| m.answers(id))
                .ok_or_else(|| anyhow::anyhow!("no response for request #{id} in event stream"))?
        } else {
            serde_json::from_str(&body).context("failed to parse MCP response")?
        };

        if let Some(error) = message.error {
            anyhow::bail!("MCP error: {} (code {})", error.message, error.code);
        }
        message
            .result
            .ok_or_else(|| anyhow::anyhow!("no result in MCP response"))
    }

    async fn notify(&self, notification: McpNotification) -> Result<()> {
        self.post(&notification).await?;
        Ok(())
    }

    async fn post<T: serde::Serialize>(&self, body: &T) -> Result<reqwest::Response> {
        let mut builder = self
            .http_client
            .post(&self.server_url)
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        if let Some(session) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.context("MCP request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("MCP server returned status: {}", response.status());
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }
        Ok(response)
    }
}

/// A remote MCP tool exposed to the agent.
pub struct McpTool {
    info: McpToolInfo,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(info: McpToolInfo, client: Arc<McpClient>) -> Self {
        Self { info, client }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let result = self.client.call_tool(&self.info.name, params).await?;
        let content = result.text();
        if result.is_error {
            anyhow::bail!("{content}");
        }
        Ok(content)
    }
}
