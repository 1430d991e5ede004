use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use skycast_config::FeishuConfig;
use tracing::{info, warn};

use crate::error::Error;
use crate::tools::Tool;

pub const TOOL_NAME: &str = "send_feishu_message";
pub const TOOL_VERSION: &str = "v1.0";
const CARD_TITLE: &str = "🌤️ 每日天气报告与建议";

/// Feishu interactive card message.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub msg_type: &'static str,
    pub card: Card,
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub config: CardConfig,
    pub header: CardHeader,
    pub elements: Vec<CardElement>,
    pub footer: PlainText,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardConfig {
    pub wide_screen_mode: bool,
    pub enable_forward: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardHeader {
    pub title: PlainText,
    pub style: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlainText {
    pub tag: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardElement {
    pub tag: &'static str,
    pub content: String,
}

impl PushPayload {
    /// Card with `content` as a markdown element and a timestamped footer.
    pub fn markdown(content: &str, pushed_at: &str) -> Self {
        Self {
            msg_type: "interactive",
            card: Card {
                config: CardConfig {
                    wide_screen_mode: true,
                    enable_forward: true,
                },
                header: CardHeader {
                    title: PlainText {
                        tag: "plain_text",
                        content: CARD_TITLE.into(),
                    },
                    style: "blue",
                },
                elements: vec![CardElement {
                    tag: "markdown",
                    content: content.to_string(),
                }],
                footer: PlainText {
                    tag: "plain_text",
                    content: format!("推送时间：{pushed_at} | 工具版本：{TOOL_VERSION}"),
                },
            },
        }
    }
}

/// Webhook reply body.
#[derive(Debug, Deserialize)]
struct WebhookReply {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

/// Pushes markdown reports to a Feishu group via its custom bot webhook.
pub struct PushTool {
    webhook_url: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl PushTool {
    pub fn new(config: &FeishuConfig) -> Self {
        Self {
            webhook_url: config.webhook_url.clone().filter(|u| !u.trim().is_empty()),
            timeout: Duration::from_secs(config.timeout_secs),
            http_client: reqwest::Client::new(),
        }
    }

    /// Push `content` and describe the outcome. Never fails: every path
    /// yields a human-readable status line.
    pub async fn send_message(&self, content: &str) -> String {
        match self.deliver(content).await {
            Ok(status) => status,
            Err(Error::Delivery(status)) | Err(Error::Configuration(status)) => status,
            Err(other) => format!("❌ 飞书推送工具异常（工具版本：{TOOL_VERSION}）：{other}"),
        }
    }

    /// Push `content`. `Ok` carries the success line; failures carry the
    /// failure line in `Error::Configuration` or `Error::Delivery`.
    pub async fn deliver(&self, content: &str) -> std::result::Result<String, Error> {
        let Some(url) = self.webhook_url.as_deref() else {
            warn!("Feishu push skipped: webhook url not configured");
            return Err(Error::Configuration(format!(
                "❌ 工具配置错误：飞书 Webhook 地址未配置（工具版本：{TOOL_VERSION}）"
            )));
        };

        let pushed_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let payload = PushPayload::markdown(content, &pushed_at);

        let reply = self.post(url, &payload).await.map_err(|e| {
            warn!("Feishu push failed: {e:#}");
            Error::Delivery(format!(
                "❌ 飞书推送工具异常（工具版本：{TOOL_VERSION}）：{e:#}"
            ))
        })?;

        let msg = reply.msg.unwrap_or_else(|| "未知错误".to_string());
        match reply.code {
            Some(0) => {
                info!("Feishu push succeeded: {msg}");
                Ok(format!(
                    "✅ 飞书消息推送成功（工具版本：{TOOL_VERSION}）：{msg}"
                ))
            }
            code => {
                let code = code.map_or_else(|| "缺失".to_string(), |c| c.to_string());
                warn!("Feishu push rejected: code={code}, msg={msg}");
                Err(Error::Delivery(format!(
                    "❌ 飞书消息推送失败（工具版本：{TOOL_VERSION}）：code={code}, msg={msg}"
                )))
            }
        }
    }

    async fn post(&self, url: &str, payload: &PushPayload) -> Result<WebhookReply> {
        let resp = self
            .http_client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await?;
        resp.error_for_status_ref()
            .map_err(|e| anyhow::anyhow!("webhook returned error status: {e}"))?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Tool for PushTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "通过飞书 Webhook 推送用户传入的 content 文本/Markdown 消息给用户/群聊。\
         输入参数 content：必填，消息内容（支持换行、Markdown 标题/分隔线等）。\
         输出推送结果（成功/失败提示）。"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "要推送的文本内容（支持 Markdown 格式）"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let content = params
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter: content"))?;
        self.deliver(content).await.map_err(|e| match e {
            Error::Delivery(status) | Error::Configuration(status) => anyhow::anyhow!(status),
            other => anyhow::anyhow!(other),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    #[derive(Clone)]
    pub(crate) enum Reply {
        Ok(Value),
        Status(StatusCode),
        NotJson,
    }

    #[derive(Clone)]
    pub(crate) struct FakeWebhook {
        reply: Reply,
        pub(crate) received: Arc<Mutex<Vec<Value>>>,
    }

    async fn handle(State(hook): State<FakeWebhook>, Json(body): Json<Value>) -> Response {
        hook.received.lock().unwrap().push(body);
        match hook.reply {
            Reply::Ok(v) => Json(v).into_response(),
            Reply::Status(s) => (s, "boom").into_response(),
            Reply::NotJson => "plain text".into_response(),
        }
    }

    /// Serve a webhook that answers every POST with `reply`.
    pub(crate) async fn spawn_webhook(reply: Reply) -> (String, FakeWebhook) {
        let hook = FakeWebhook {
            reply,
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/hook", post(handle))
            .with_state(hook.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), hook)
    }

    fn tool_for(url: Option<String>) -> PushTool {
        PushTool::new(&FeishuConfig {
            webhook_url: url,
            timeout_secs: 5,
        })
    }

    #[test]
    fn payload_matches_card_layout() {
        let payload = PushPayload::markdown("## 杭州", "2025-01-01 08:00:00");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["msg_type"], "interactive");
        assert_eq!(json["card"]["config"]["wide_screen_mode"], true);
        assert_eq!(json["card"]["header"]["title"]["content"], CARD_TITLE);
        assert_eq!(json["card"]["header"]["style"], "blue");
        assert_eq!(json["card"]["elements"][0]["tag"], "markdown");
        assert_eq!(json["card"]["elements"][0]["content"], "## 杭州");
        assert_eq!(
            json["card"]["footer"]["content"],
            "推送时间：2025-01-01 08:00:00 | 工具版本：v1.0"
        );
    }

    #[tokio::test]
    async fn unconfigured_webhook_returns_error_string() {
        let status = tool_for(None).send_message("hi").await;
        assert!(status.starts_with('❌'));
        assert!(status.contains("未配置"));

        let blank = tool_for(Some("  ".into())).send_message("hi").await;
        assert!(blank.contains("未配置"));
    }

    #[tokio::test]
    async fn code_zero_is_success() {
        let (url, hook) = spawn_webhook(Reply::Ok(json!({"code": 0, "msg": "ok"}))).await;
        let status = tool_for(Some(url)).send_message("## 报告").await;
        assert!(status.contains('✅'), "{status}");
        assert!(status.contains("ok"));

        let received = hook.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["card"]["elements"][0]["content"], "## 报告");
    }

    #[tokio::test]
    async fn nonzero_code_is_failure() {
        let (url, _) = spawn_webhook(Reply::Ok(json!({"code": 19024, "msg": "Key Words Not Found"}))).await;
        let status = tool_for(Some(url)).send_message("x").await;
        assert!(status.starts_with('❌'), "{status}");
        assert!(status.contains("19024"));
        assert!(status.contains("Key Words Not Found"));
    }

    #[tokio::test]
    async fn non_2xx_is_failure() {
        let (url, _) = spawn_webhook(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR)).await;
        let status = tool_for(Some(url)).send_message("x").await;
        assert!(status.starts_with('❌'), "{status}");
        assert!(status.contains("500"));
    }

    #[tokio::test]
    async fn unparseable_body_is_failure() {
        let (url, _) = spawn_webhook(Reply::NotJson).await;
        let status = tool_for(Some(url)).send_message("x").await;
        assert!(status.starts_with('❌'), "{status}");
    }

    #[tokio::test]
    async fn network_error_is_failure() {
        let status = tool_for(Some("http://127.0.0.1:9/hook".into()))
            .send_message("x")
            .await;
        assert!(status.starts_with('❌'), "{status}");
        assert!(status.contains("异常"));
    }

    #[tokio::test]
    async fn tool_execute_maps_failure_to_err() {
        let err = tool_for(None)
            .execute(json!({"content": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("未配置"));

        let (url, _) = spawn_webhook(Reply::Ok(json!({"code": 0, "msg": "success"}))).await;
        let ok = tool_for(Some(url))
            .execute(json!({"content": "x"}))
            .await
            .unwrap();
        assert!(ok.starts_with('✅'));
    }
}
