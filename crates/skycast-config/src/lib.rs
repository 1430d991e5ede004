pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, find_config_path, load, load_config};
pub use schema::{
    mask_secret, AgentConfig, AmapConfig, Config, FeishuConfig, GatewayConfig, ProviderConfig,
    ProvidersConfig, ScheduleConfig, ToolsConfig,
};
