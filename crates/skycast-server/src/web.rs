use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use skycast_core::service::{SERVICE_VERSION, WEATHER_TOOL_VERSION};
use skycast_core::tools::push::TOOL_VERSION as PUSH_TOOL_VERSION;
use skycast_core::{RunError, WeatherService};
use tracing::{error, info};

const SERVICE_DESCRIPTION: &str = "查询指定城市的天气并通过飞书推送完整、实用的天气报告...";

#[derive(Clone)]
struct AppState {
    service: Arc<WeatherService>,
}

#[derive(Debug, Serialize)]
struct ToolVersions {
    #[serde(rename = "天气工具")]
    weather: &'static str,
    #[serde(rename = "推送工具")]
    push: &'static str,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    message: &'static str,
    tool_versions: ToolVersions,
    result: String,
    tools_used: Vec<String>,
}

impl TriggerResponse {
    fn new(message: &'static str, result: String, tools_used: Vec<String>) -> Self {
        Self {
            message,
            tool_versions: ToolVersions {
                weather: WEATHER_TOOL_VERSION,
                push: PUSH_TOOL_VERSION,
            },
            result,
            tools_used,
        }
    }
}

pub fn router(service: Arc<WeatherService>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/trigger-weather", get(trigger_weather))
        .route("/version", get(version))
        .with_state(AppState { service })
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    service: Arc<WeatherService>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!("HTTP server error: {e}");
            anyhow::anyhow!(e)
        })
}

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "天气查询推送Agent服务运行中" }))
}

async fn version() -> impl IntoResponse {
    Json(json!({
        "detail": {
            "version": SERVICE_VERSION,
            "description": SERVICE_DESCRIPTION,
        }
    }))
}

async fn trigger_weather(State(state): State<AppState>) -> Response {
    info!("Manual weather report triggered");
    let (status, body) = match state.service.run_cycle().await {
        Ok(run) => (
            StatusCode::OK,
            TriggerResponse::new(
                "手动触发天气推送成功",
                run.final_message.clone(),
                run.tools_used().into_iter().map(String::from).collect(),
            ),
        ),
        Err(RunError::Failed { run, .. }) => (
            StatusCode::BAD_GATEWAY,
            TriggerResponse::new(
                "手动触发天气推送失败",
                run.final_message.clone(),
                run.tools_used().into_iter().map(String::from).collect(),
            ),
        ),
        Err(e @ RunError::Busy) => (
            StatusCode::CONFLICT,
            TriggerResponse::new("天气推送任务正在执行中，请稍后再试", e.to_string(), Vec::new()),
        ),
        Err(e @ RunError::DeadlineExceeded(_)) => (
            StatusCode::GATEWAY_TIMEOUT,
            TriggerResponse::new("天气推送任务执行超时", e.to_string(), Vec::new()),
        ),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;
    use skycast_core::llm::{ChatClient, ChatRequest, Completion, ToolRequest};
    use skycast_core::tools::{Tool, ToolRegistry};
    use tokio::sync::Notify;

    struct ScriptedClient {
        script: Mutex<VecDeque<Completion>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<Completion> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    struct WeatherTool {
        fail: bool,
    }

    #[async_trait]
    impl Tool for WeatherTool {
        fn name(&self) -> &str {
            "maps_weather"
        }

        fn description(&self) -> &str {
            "根据城市名称查询天气"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]})
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("INVALID_USER_KEY");
            }
            Ok("多云 5℃ 4级 65%".into())
        }
    }

    fn weather_call() -> Completion {
        Completion {
            text: String::new(),
            tool_requests: vec![ToolRequest {
                id: "c1".into(),
                call_id: None,
                name: "maps_weather".into(),
                arguments: json!({"city": "杭州"}),
            }],
        }
    }

    fn service(script: Vec<Completion>, fail: bool, gate: Option<Arc<Notify>>) -> Arc<WeatherService> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool { fail }));
        let client = Arc::new(ScriptedClient {
            script: Mutex::new(script.into()),
            gate,
        });
        Arc::new(WeatherService::new(client, tools, "杭州", chrono_tz::Asia::Shanghai))
    }

    async fn spawn(service: Arc<WeatherService>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(service)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn root_and_version() {
        let base = spawn(service(Vec::new(), false, None)).await;

        let root: Value = reqwest::get(format!("{base}/")).await.unwrap().json().await.unwrap();
        assert_eq!(root["message"], "天气查询推送Agent服务运行中");

        let version: Value = reqwest::get(format!("{base}/version"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(version["detail"]["version"], "v1.0");
        assert!(version["detail"]["description"]
            .as_str()
            .unwrap()
            .starts_with("查询指定城市的天气"));
    }

    #[tokio::test]
    async fn trigger_success() {
        let script = vec![
            weather_call(),
            Completion {
                text: "今日天气推送已完成（城市：杭州）".into(),
                tool_requests: Vec::new(),
            },
        ];
        let base = spawn(service(script, false, None)).await;

        let resp = reqwest::get(format!("{base}/trigger-weather")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], "手动触发天气推送成功");
        assert_eq!(body["tool_versions"]["天气工具"], "v1.0");
        assert_eq!(body["tool_versions"]["推送工具"], "v1.0");
        assert_eq!(body["result"], "今日天气推送已完成（城市：杭州）");
        assert_eq!(body["tools_used"], json!(["maps_weather"]));
    }

    #[tokio::test]
    async fn trigger_failed_run_is_bad_gateway() {
        let base = spawn(service(vec![weather_call()], true, None)).await;

        let resp = reqwest::get(format!("{base}/trigger-weather")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = resp.json().await.unwrap();
        assert!(body["result"].as_str().unwrap().contains("INVALID_USER_KEY"));
        assert_eq!(body["tools_used"], json!(["maps_weather"]));
    }

    #[tokio::test]
    async fn trigger_while_busy_is_conflict() {
        let gate = Arc::new(Notify::new());
        let svc = service(
            vec![Completion {
                text: "done".into(),
                tool_requests: Vec::new(),
            }],
            false,
            Some(gate.clone()),
        );
        let base = spawn(svc.clone()).await;

        let first = tokio::spawn({
            let url = format!("{base}/trigger-weather");
            async move { reqwest::get(url).await.unwrap().status() }
        });
        while !svc.is_busy() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let resp = reqwest::get(format!("{base}/trigger-weather")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), reqwest::StatusCode::OK);
    }
}
