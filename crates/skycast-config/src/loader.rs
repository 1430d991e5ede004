use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::Config;

const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR: &str = ".skycast";

/// Places a config file is looked for, most specific first: the working
/// directory, then `~/.skycast`.
fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
    candidates.extend(dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)));
    candidates
}

/// The first candidate that exists. Otherwise the last candidate, so callers
/// can still report where a config would be read from.
pub fn find_config_path() -> PathBuf {
    let candidates = config_candidates();
    candidates
        .iter()
        .find(|path| path.exists())
        .or_else(|| candidates.last())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Load configuration from a JSON file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Load `.env` (if present), the JSON config file, then apply environment
/// overrides on top.
pub fn load(path: &Path) -> Result<Config> {
    match dotenvy::dotenv() {
        Ok(env_path) => debug!("Loaded environment from {}", env_path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e).context("failed to load .env"),
    }
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Overlay environment variables onto a config. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(city) = get("TARGET_CITY") {
        config.agent.target_city = city;
    }

    if let Some(provider) = get("DEFAULT_PUSH_AGENT_LLM_PROVIDER") {
        config.providers.default_provider = Some(provider);
    }
    if let Some(key) = get("DASHSCOPE_API_KEY") {
        config.providers.qwen.api_key = Some(key);
    }
    if let Some(model) = get("DASHSCOPE_API_MODEL") {
        config.providers.qwen.model = Some(model);
    }
    if let Some(key) = get("GEMINI_API_KEY") {
        config.providers.gemini.api_key = Some(key);
    }
    if let Some(model) = get("GEMINI_API_MODEL") {
        config.providers.gemini.model = Some(model);
    }

    if let Some(key) = get("AMAP_API_KEY") {
        config.tools.amap.api_key = Some(key);
    }
    if let Some(url) = get("AMAP_MCP_URL") {
        config.tools.amap.mcp_url = url;
    }
    if let Some(url) = get("FEISHU_WEBHOOK_URL") {
        config.tools.feishu.webhook_url = Some(url);
    }

    if let Some(hour) = get("CRON_HOUR") {
        config.schedule.hour = parse_env("CRON_HOUR", &hour)?;
    }
    if let Some(minute) = get("CRON_MINUTE") {
        config.schedule.minute = parse_env("CRON_MINUTE", &minute)?;
    }
    if let Some(tz) = get("CRON_TIMEZONE") {
        config.schedule.timezone = tz;
    }

    if let Some(host) = get("SKYCAST_HOST") {
        config.gateway.host = host;
    }
    if let Some(port) = get("SKYCAST_PORT") {
        config.gateway.port = parse_env("SKYCAST_PORT", &port)?;
    }

    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: '{value}'"))
}
