use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    pub schedule: ScheduleConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// City the daily report is generated for.
    pub target_city: String,
    pub temperature: f64,
    /// Upper bound on model calls within one run.
    pub max_tool_iterations: usize,
    /// Overall deadline for one report-and-push cycle.
    pub run_deadline_secs: u64,
    /// Per-request timeout for chat completion calls.
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            target_city: "杭州".into(),
            temperature: 0.7,
            max_tool_iterations: 10,
            run_deadline_secs: 180,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    /// Preferred provider name ("qwen" or "gemini"). Auto-detected when unset.
    pub default_provider: Option<String>,
    pub qwen: ProviderConfig,
    pub gemini: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
}

impl ProviderConfig {
    /// The API key, treating an empty string as absent.
    pub fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub amap: AmapConfig,
    pub feishu: FeishuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AmapConfig {
    pub api_key: Option<String>,
    /// Streamable HTTP endpoint of the AMap MCP server. The key is appended
    /// as a `key` query parameter.
    pub mcp_url: String,
    pub timeout_secs: u64,
}

impl Default for AmapConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            mcp_url: "https://mcp.amap.com/mcp".into(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeishuConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    /// IANA timezone name the hour/minute are interpreted in.
    pub timezone: String,
    pub misfire_grace_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 8,
            minute: 0,
            timezone: "Asia/Shanghai".into(),
            misfire_grace_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// Render a secret for logs: keeps a short prefix and suffix only.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return "<unset>".into();
    }
    if chars.len() <= 8 {
        return "****".into();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.agent.target_city, "杭州");
        assert_eq!(cfg.schedule.hour, 8);
        assert_eq!(cfg.schedule.minute, 0);
        assert_eq!(cfg.schedule.timezone, "Asia/Shanghai");
        assert_eq!(cfg.schedule.misfire_grace_secs, 300);
        assert_eq!(cfg.tools.amap.timeout_secs, 15);
        assert_eq!(cfg.tools.feishu.timeout_secs, 10);
        assert_eq!(cfg.gateway.port, 8000);
        assert!(cfg.providers.default_provider.is_none());
    }

    #[test]
    fn camel_case_fields_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "agent": { "targetCity": "Hangzhou", "runDeadlineSecs": 60 },
            "providers": {
                "defaultProvider": "gemini",
                "gemini": { "apiKey": "g-key", "model": "gemini-2.0-flash" }
            },
            "tools": { "feishu": { "webhookUrl": "https://example.com/hook" } },
            "schedule": { "hour": 7, "minute": 30 }
        }))
        .unwrap();
        assert_eq!(cfg.agent.target_city, "Hangzhou");
        assert_eq!(cfg.agent.run_deadline_secs, 60);
        assert_eq!(cfg.agent.max_tool_iterations, 10);
        assert_eq!(cfg.providers.default_provider.as_deref(), Some("gemini"));
        assert_eq!(cfg.providers.gemini.key(), Some("g-key"));
        assert_eq!(
            cfg.tools.feishu.webhook_url.as_deref(),
            Some("https://example.com/hook")
        );
        assert_eq!(cfg.schedule.hour, 7);
        assert_eq!(cfg.schedule.minute, 30);
    }

    #[test]
    fn empty_api_key_is_absent() {
        let provider = ProviderConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(provider.key().is_none());
    }

    #[test]
    fn mask_secret_hides_middle() {
        assert_eq!(mask_secret(""), "<unset>");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("sk-1234567890abc"), "sk-1…abc");
    }
}
