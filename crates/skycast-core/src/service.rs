use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use skycast_config::Config;
use thiserror::Error as ThisError;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::agent::{AgentLoop, AgentRunResult, ContextBuilder, RunOutcome};
use crate::cron::Job;
use crate::error::Error;
use crate::llm::{select_model, ChatClient, ModelSelection};
use crate::tools::{build_tools, ToolRegistry};

/// Service version reported by the HTTP front door.
pub const SERVICE_VERSION: &str = "v1.0";
/// Version of the remote weather tool set.
pub const WEATHER_TOOL_VERSION: &str = "v1.0";
/// Scheduler id of the daily report job.
pub const DAILY_JOB_ID: &str = "daily_weather_push_v1.0";

/// Why a report cycle did not complete.
#[derive(Debug, ThisError)]
pub enum RunError {
    #[error("a weather report cycle is already running")]
    Busy,

    #[error("weather report cycle exceeded its {}s deadline", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// The agent run finished but failed; `run` keeps its trace.
    #[error("{error}")]
    Failed {
        error: Error,
        run: Box<AgentRunResult>,
    },
}

/// Model identity, for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub provider: String,
    pub base_url: String,
    pub model_name: String,
}

/// Application context: the chosen model, the discovered tools and the
/// single-run guard. Built once at startup and shared behind an `Arc`.
pub struct WeatherService {
    agent: AgentLoop,
    context: ContextBuilder,
    model: ModelInfo,
    timezone: Tz,
    deadline: Duration,
    run_guard: Mutex<()>,
    running: AtomicBool,
}

/// Clears the running flag when a cycle ends, including on cancellation.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl WeatherService {
    /// Select the model and discover tools. Any failure is fatal.
    pub async fn bootstrap(config: &Config) -> Result<Self, Error> {
        let timezone = parse_timezone(&config.schedule.timezone)?;

        let ModelSelection {
            provider,
            base_url,
            model_name,
            client,
        } = select_model(
            config.providers.default_provider.as_deref(),
            &config.providers,
            &config.agent,
        )?;

        let tools = build_tools(&config.tools).await?;

        let service = Self::new(client, tools, &config.agent.target_city, timezone)
            .with_model_info(ModelInfo {
                provider,
                base_url,
                model_name,
            })
            .with_limits(
                config.agent.max_tool_iterations,
                Duration::from_secs(config.agent.run_deadline_secs),
            );
        info!(
            "Weather service ready: city={}, provider={}, model={}, tools={}",
            service.context.target_city(),
            service.model.provider,
            service.model.model_name,
            service.agent.tools().len()
        );
        Ok(service)
    }

    pub fn new(
        client: Arc<dyn ChatClient>,
        tools: ToolRegistry,
        target_city: &str,
        timezone: Tz,
    ) -> Self {
        let defaults = skycast_config::AgentConfig::default();
        let model = ModelInfo {
            provider: "custom".to_string(),
            base_url: String::new(),
            model_name: client.model_name().to_string(),
        };
        Self {
            agent: AgentLoop::new(client, Arc::new(tools), defaults.max_tool_iterations),
            context: ContextBuilder::new(target_city),
            model,
            timezone,
            deadline: Duration::from_secs(defaults.run_deadline_secs),
            run_guard: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_model_info(mut self, model: ModelInfo) -> Self {
        self.model = model;
        self
    }

    pub fn with_limits(mut self, max_iterations: usize, deadline: Duration) -> Self {
        self.agent = self.agent.with_max_iterations(max_iterations);
        self.deadline = deadline;
        self
    }

    pub fn target_city(&self) -> &str {
        self.context.target_city()
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.agent.tools()
    }

    /// Whether a cycle is in flight. Reads a flag and never touches the
    /// run guard itself.
    pub fn is_busy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one query, compose and push cycle.
    ///
    /// At most one cycle runs at a time; a concurrent call is rejected with
    /// [`RunError::Busy`] rather than queued.
    pub async fn run_cycle(&self) -> Result<AgentRunResult, RunError> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            warn!("Weather report requested while another cycle is running");
            return Err(RunError::Busy);
        };
        let _running = RunningFlag::raise(&self.running);

        let now = Utc::now().with_timezone(&self.timezone);
        let system_prompt = self.context.build_system_prompt(self.agent.tools());
        let user_prompt = self.context.build_user_prompt(&now);
        info!(
            "=== Weather report cycle started: {} ({}) ===",
            now.format("%Y-%m-%d %H:%M:%S"),
            self.context.target_city()
        );

        let run = tokio::time::timeout(self.deadline, self.agent.run(&system_prompt, &user_prompt))
            .await
            .map_err(|_| {
                warn!(
                    "Weather report cycle abandoned after {}s",
                    self.deadline.as_secs()
                );
                RunError::DeadlineExceeded(self.deadline)
            })?;

        match &run.outcome {
            RunOutcome::Completed => {
                info!("Weather report cycle {} result: {}", run.run_id, run.final_message);
                Ok(run)
            }
            RunOutcome::Failed(error) => {
                warn!("Weather report cycle {} failed: {error}", run.run_id);
                Err(RunError::Failed {
                    error: error.clone(),
                    run: Box::new(run),
                })
            }
        }
    }
}

fn parse_timezone(name: &str) -> Result<Tz, Error> {
    name.parse()
        .map_err(|_| Error::Configuration(format!("unknown timezone '{name}'")))
}

/// Scheduler job that runs one report cycle.
pub struct DailyReportJob {
    service: Arc<WeatherService>,
}

impl DailyReportJob {
    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Job for DailyReportJob {
    async fn run(&self) {
        // Outcomes are logged inside run_cycle.
        if let Err(RunError::Busy) = self.service.run_cycle().await {
            warn!("Scheduled weather report skipped: a manual run is in progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::Notify;

    use crate::agent::r#loop::tests::{answer, call, ScriptedClient};
    use crate::llm::{ChatRequest, Completion};
    use crate::tools::tests::StaticTool;

    fn tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool::ok("maps_weather", "晴 20℃")));
        tools.register(Arc::new(StaticTool::ok("send_feishu_message", "✅ 飞书消息推送成功")));
        tools
    }

    /// Blocks every completion until released.
    struct GatedClient {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatClient for GatedClient {
        fn model_name(&self) -> &str {
            "gated"
        }

        async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<Completion> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Completion {
                text: "done".into(),
                tool_requests: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn completed_cycle_returns_final_message() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(call("c1", "maps_weather", json!({"city": "杭州"}))),
            Ok(call("c2", "send_feishu_message", json!({"content": "报告"}))),
            Ok(answer("今日天气推送已完成（城市：杭州）")),
        ]));
        let service = WeatherService::new(client.clone(), tools(), "杭州", chrono_tz::Asia::Shanghai);

        let run = service.run_cycle().await.unwrap();
        assert_eq!(run.tools_used(), vec!["maps_weather", "send_feishu_message"]);

        let requests = client.requests.lock().unwrap();
        assert!(requests[0].system_prompt.contains("send_feishu_message"));
        assert!(matches!(
            &requests[0].messages[0],
            crate::llm::ChatMessage::User(u) if u.starts_with("目标城市：杭州")
        ));
    }

    #[tokio::test]
    async fn failed_run_keeps_trace() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StaticTool::failing("maps_weather", "INVALID_USER_KEY")));
        let client = Arc::new(ScriptedClient::new(vec![Ok(call(
            "c1",
            "maps_weather",
            json!({"city": "杭州"}),
        ))]));
        let service = WeatherService::new(client, tools, "杭州", chrono_tz::Asia::Shanghai);

        match service.run_cycle().await {
            Err(RunError::Failed { error, run }) => {
                assert!(matches!(error, Error::ToolInvocation { .. }));
                assert_eq!(run.tools_used(), vec!["maps_weather"]);
                assert!(run.final_message.contains("INVALID_USER_KEY"));
            }
            other => panic!("expected failed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_cycle_is_rejected() {
        let client = Arc::new(GatedClient {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let service = Arc::new(WeatherService::new(
            client.clone(),
            tools(),
            "杭州",
            chrono_tz::Asia::Shanghai,
        ));

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.run_cycle().await }
        });
        client.entered.notified().await;

        assert!(service.is_busy());
        assert!(matches!(service.run_cycle().await, Err(RunError::Busy)));

        client.release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn polling_busy_state_never_blocks_a_cycle() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(answer("done"))]));
        let service = Arc::new(WeatherService::new(client, tools(), "杭州", chrono_tz::Asia::Shanghai));

        let poller = tokio::spawn({
            let service = service.clone();
            async move {
                for _ in 0..1_000 {
                    let _ = service.is_busy();
                    tokio::task::yield_now().await;
                }
            }
        });

        assert!(service.run_cycle().await.is_ok());
        assert!(!service.is_busy());
        poller.await.unwrap();
    }

    #[tokio::test]
    async fn deadline_abandons_cycle() {
        let client = Arc::new(GatedClient {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let service = WeatherService::new(client, tools(), "杭州", chrono_tz::Asia::Shanghai)
            .with_limits(10, Duration::from_millis(50));

        let err = service.run_cycle().await.unwrap_err();
        assert!(matches!(err, RunError::DeadlineExceeded(_)));
        // The guard is released once the cycle is abandoned.
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn bootstrap_fails_without_model_key() {
        let err = WeatherService::bootstrap(&Config::default()).await.err();
        assert!(matches!(err, Some(Error::Initialization(_))));
    }

    #[tokio::test]
    async fn bootstrap_detects_provider_when_configured_one_is_unknown() {
        let mut config = Config::default();
        config.providers.default_provider = Some("openai".into());
        config.providers.gemini.api_key = Some("g-key-1234567890".into());

        // Model selection succeeds on gemini; startup then stops at tool
        // discovery because no AMap key is set.
        let err = WeatherService::bootstrap(&config).await.err();
        assert!(matches!(err, Some(Error::Configuration(ref m)) if m.contains("AMAP_API_KEY")));
    }

    #[tokio::test]
    async fn bootstrap_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.schedule.timezone = "Nowhere/Land".into();
        let err = WeatherService::bootstrap(&config).await.err();
        assert!(matches!(err, Some(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn scheduled_job_runs_a_cycle() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(answer("done"))]));
        let service = Arc::new(WeatherService::new(
            client.clone(),
            tools(),
            "杭州",
            chrono_tz::Asia::Shanghai,
        ));
        DailyReportJob::new(service).run().await;
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }
}
