pub mod mcp;
pub mod push;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use skycast_config::ToolsConfig;
use tracing::info;

use crate::error::Error;
use mcp::{McpClient, McpTool};
use push::PushTool;

/// Trait for tools callable by the LLM agent.
///
/// `execute` returns the text handed back to the model; an `Err` means the
/// call failed and ends the run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<String>;
}

/// Ordered registry of available tools. Names are unique; registering a
/// tool under an existing name replaces it in place.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&dyn Tool> {
        self.tools.iter().map(|t| t.as_ref()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// `name: description` lines, one per tool.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool definitions in the shape the completion API expects.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, params: serde_json::Value) -> Result<String> {
        match self.get(name) {
            Some(tool) => {
                let errors = validate_params(&params, &tool.parameters_schema());
                if !errors.is_empty() {
                    anyhow::bail!(
                        "Invalid parameters for tool '{}': {}",
                        name,
                        errors.join("; ")
                    );
                }
                tool.execute(params).await
            }
            None => anyhow::bail!("unknown tool: {name}"),
        }
    }
}

/// Discover the remote AMap tools and append the local push tool.
///
/// Any discovery failure is fatal; retrying is left to the caller.
pub async fn build_tools(config: &ToolsConfig) -> Result<ToolRegistry, Error> {
    let client = Arc::new(McpClient::for_amap(&config.amap)?);
    client
        .connect()
        .await
        .map_err(|e| Error::ToolDiscovery(format!("{e:#}")))?;
    let remote = client
        .list_tools()
        .await
        .map_err(|e| Error::ToolDiscovery(format!("{e:#}")))?;

    let mut registry = ToolRegistry::new();
    for info in remote {
        registry.register(Arc::new(McpTool::new(info, client.clone())));
    }
    let remote_count = registry.len();
    registry.register(Arc::new(PushTool::new(&config.feishu)));

    info!(
        "Tool registry built: {remote_count} remote tool(s) + 1 local: {}",
        registry.names().join(", ")
    );
    Ok(registry)
}

/// Check model-supplied arguments against the schema a tool advertises.
///
/// Remote MCP servers publish loosely written schemas, so only the keywords
/// they are seen to use are enforced: `type` (a single name or a list of
/// names), `enum`, `minimum`/`maximum`, `required`, `properties` and `items`.
/// Unknown keywords are accepted. Returns one message per violation.
fn validate_params(params: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();
    check_value(params, schema, "", &mut errors);
    errors
}

fn field_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

fn matches_type(val: &serde_json::Value, name: &str) -> bool {
    match name {
        "object" => val.is_object(),
        "array" => val.is_array(),
        "string" => val.is_string(),
        "integer" => val.is_i64() || val.is_u64(),
        "number" => val.is_number(),
        "boolean" => val.is_boolean(),
        "null" => val.is_null(),
        _ => true,
    }
}

fn check_value(
    val: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    let at = if path.is_empty() { "arguments" } else { path };

    let declared: Vec<&str> = match schema.get("type") {
        Some(serde_json::Value::String(name)) => vec![name.as_str()],
        Some(serde_json::Value::Array(names)) => names.iter().filter_map(|n| n.as_str()).collect(),
        _ => Vec::new(),
    };
    if !declared.is_empty() && !declared.iter().any(|name| matches_type(val, name)) {
        errors.push(format!("{at}: expected type '{}'", declared.join("|")));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(val) {
            let allowed = serde_json::Value::Array(allowed.clone());
            errors.push(format!("{at}: {val} is not one of {allowed}"));
        }
    }

    if let Some(n) = val.as_f64() {
        let bound = |key: &str| schema.get(key).and_then(|b| b.as_f64());
        if let Some(min) = bound("minimum").filter(|min| n < *min) {
            errors.push(format!("{at}: {n} is below the minimum {min}"));
        }
        if let Some(max) = bound("maximum").filter(|max| n > *max) {
            errors.push(format!("{at}: {n} is above the maximum {max}"));
        }
    }

    match val {
        serde_json::Value::Object(fields) => {
            let required = schema.get("required").and_then(|r| r.as_array());
            for name in required.into_iter().flatten().filter_map(|r| r.as_str()) {
                if !fields.contains_key(name) {
                    errors.push(format!("{}: required field missing", field_path(path, name)));
                }
            }
            let properties = schema.get("properties").and_then(|p| p.as_object());
            for (name, prop_schema) in properties.into_iter().flatten() {
                if let Some(field) = fields.get(name) {
                    check_value(field, prop_schema, &field_path(path, name), errors);
                }
            }
        }
        serde_json::Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check_value(item, item_schema, &format!("{at}[{i}]"), errors);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Tool with a fixed reply, for registry and agent loop tests.
    pub(crate) struct StaticTool {
        pub name: &'static str,
        pub reply: std::result::Result<String, String>,
    }

    impl StaticTool {
        pub(crate) fn ok(name: &'static str, reply: &str) -> Self {
            Self {
                name,
                reply: Ok(reply.to_string()),
            }
        }

        pub(crate) fn failing(name: &'static str, error: &str) -> Self {
            Self {
                name,
                reply: Err(error.to_string()),
            }
        }
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "static test tool"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: serde_json::Value) -> Result<String> {
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn static_tool(name: &'static str, reply: &str) -> Arc<dyn Tool> {
        Arc::new(StaticTool::ok(name, reply))
    }

    #[test]
    fn registry_preserves_order_and_replaces_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(static_tool("maps_weather", "a"));
        registry.register(static_tool("send_feishu_message", "b"));
        registry.register(static_tool("maps_weather", "c"));
        assert_eq!(registry.names(), vec!["maps_weather", "send_feishu_message"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn registered_names_always_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(static_tool("maps_weather", "sunny"));
        registry.register(static_tool("send_feishu_message", "sent"));
        for name in registry.names() {
            assert!(registry.get(name).is_some());
            assert!(registry.execute(name, serde_json::json!({})).await.is_ok());
        }
    }

    #[tokio::test]
    async fn unknown_name_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("maps_weather", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_params_are_an_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PushTool::new(&Default::default())));
        let err = registry
            .execute("send_feishu_message", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("content: required field missing"));
    }

    #[test]
    fn describe_lists_name_and_description() {
        let mut registry = ToolRegistry::new();
        registry.register(static_tool("maps_weather", "x"));
        assert_eq!(registry.describe(), "maps_weather: static test tool");
        assert_eq!(registry.definitions()[0].name, "maps_weather");
    }

    #[test]
    fn test_wrong_type() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "city": {"type": "string"} },
            "required": ["city"]
        });
        let errors = validate_params(&serde_json::json!({"city": 42}), &schema);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected type 'string'"));
    }

    #[test]
    fn test_enum_and_range() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "extensions": {"type": "string", "enum": ["base", "all"]},
                "days": {"type": "integer", "minimum": 1, "maximum": 4}
            }
        });
        let errors = validate_params(
            &serde_json::json!({"extensions": "none", "days": 7}),
            &schema,
        );
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn nullable_type_list_accepts_either() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "city": {"type": ["string", "null"]} }
        });
        assert!(validate_params(&serde_json::json!({"city": null}), &schema).is_empty());
        assert!(validate_params(&serde_json::json!({"city": "杭州"}), &schema).is_empty());

        let errors = validate_params(&serde_json::json!({"city": 1}), &schema);
        assert_eq!(errors, vec!["city: expected type 'string|null'".to_string()]);
    }

    #[test]
    fn non_object_arguments_are_rejected_at_top_level() {
        let schema = serde_json::json!({"type": "object", "required": ["city"]});
        let errors = validate_params(&serde_json::json!("杭州"), &schema);
        assert_eq!(errors, vec!["arguments: expected type 'object'".to_string()]);
    }
}
