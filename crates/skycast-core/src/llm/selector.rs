use std::sync::Arc;
use std::time::Duration;

#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::CompletionClient;
use rig::providers::openai;
use skycast_config::{mask_secret, AgentConfig, ProvidersConfig};
use tracing::{info, warn};

use super::{ChatClient, RigChatClient};
use crate::error::{Error, Result};

/// Provider used when nothing is configured, and as the fallback target.
pub const DEFAULT_PROVIDER: &str = "qwen";

const DEFAULT_MODEL: &str = "qwen-plus";
const QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";

/// Names in auto-detection priority order.
pub const KNOWN_PROVIDERS: [&str; 2] = ["qwen", "gemini"];

/// Resolved connection settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub name: &'static str,
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
}

impl ProviderSpec {
    /// Look up a provider by name. Unknown names yield `None`.
    pub fn resolve(name: &str, config: &ProvidersConfig) -> Option<Self> {
        let (name, cfg, base_url) = match name {
            "qwen" => ("qwen", &config.qwen, QWEN_BASE_URL),
            "gemini" => ("gemini", &config.gemini, GEMINI_BASE_URL),
            _ => return None,
        };
        Some(Self {
            name,
            base_url: cfg
                .api_base
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| base_url.to_string()),
            api_key: cfg.key().map(str::to_string),
            chat_model: cfg
                .model
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

/// A constructed chat client plus the settings it was built from.
pub struct ModelSelection {
    pub provider: String,
    pub base_url: String,
    pub model_name: String,
    pub client: Arc<dyn ChatClient>,
}

impl std::fmt::Debug for ModelSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelection")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

/// Pick the first provider whose credential is present, else the default.
pub fn detect_provider(config: &ProvidersConfig) -> &'static str {
    if config.qwen.key().is_some() {
        return "qwen";
    }
    if config.gemini.key().is_some() {
        return "gemini";
    }
    DEFAULT_PROVIDER
}

/// Select and construct the chat model.
///
/// Without a preference, or with an unrecognised one, the provider is
/// auto-detected. If construction fails for a provider other than the
/// default, one retry is made against the default provider before giving up.
pub fn select_model(
    preferred: Option<&str>,
    providers: &ProvidersConfig,
    agent: &AgentConfig,
) -> Result<ModelSelection> {
    let preferred = preferred.filter(|name| {
        let known = KNOWN_PROVIDERS.contains(name);
        if !known {
            warn!(
                "Ignoring unsupported LLM provider '{name}' (valid: {}); auto-detecting",
                KNOWN_PROVIDERS.join(", ")
            );
        }
        known
    });
    let provider = preferred.unwrap_or_else(|| detect_provider(providers));
    info!("Selected LLM provider: {provider}");

    match init_model(provider, providers, agent) {
        Ok(selection) => Ok(selection),
        Err(e) if provider != DEFAULT_PROVIDER => {
            warn!("{e}; retrying with default provider '{DEFAULT_PROVIDER}'");
            init_model(DEFAULT_PROVIDER, providers, agent)
        }
        Err(e) => Err(e),
    }
}

#[allow(deprecated)]
fn init_model(
    provider: &str,
    providers: &ProvidersConfig,
    agent: &AgentConfig,
) -> Result<ModelSelection> {
    let spec = ProviderSpec::resolve(provider, providers).ok_or_else(|| {
        Error::Initialization(format!(
            "unsupported LLM provider '{provider}' (valid: {})",
            KNOWN_PROVIDERS.join(", ")
        ))
    })?;

    let key = spec.api_key.clone().ok_or_else(|| {
        Error::Initialization(format!("API key for provider '{}' is not configured", spec.name))
    })?;

    info!(
        "Initializing {} LLM: base_url={}, model={}, api_key={}",
        spec.name,
        spec.base_url,
        spec.chat_model,
        mask_secret(&key)
    );

    let client: openai::CompletionsClient = openai::CompletionsClient::builder()
        .api_key(&key)
        .base_url(&spec.base_url)
        .build()
        .map_err(|e| {
            Error::Initialization(format!("failed to create {} client: {e}", spec.name))
        })?;
    let model = client.completion_model(&spec.chat_model);
    let handle = CompletionModelHandle::new(Arc::new(model));

    let chat = RigChatClient::new(
        handle,
        spec.chat_model.clone(),
        agent.temperature,
        Duration::from_secs(agent.request_timeout_secs),
    );

    info!("Initialized {} LLM with model '{}'", spec.name, spec.chat_model);
    Ok(ModelSelection {
        provider: spec.name.to_string(),
        base_url: spec.base_url,
        model_name: spec.chat_model,
        client: Arc::new(chat),
    })
}
