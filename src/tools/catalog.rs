//! Snapshot of the tools discovered from Drupal at startup.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::model::{JsonObject, Meta, Tool as McpTool};
use serde_json::json;
use tracing::warn;

use crate::auth::{AuthLevel, auth_level_of};
use crate::drupal::ToolDefinition;
use crate::types::ToolName;

/// Closed name -> definition map. Never changes after construction.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<ToolName, ToolDefinition>,
}

impl ToolCatalog {
    /// Build from discovered definitions. A repeated name keeps the last one.
    pub fn new(definitions: Vec<ToolDefinition>) -> Self {
        let mut tools = BTreeMap::new();
        for def in definitions {
            if let Some(previous) = tools.insert(def.name.clone(), def) {
                warn!(
                    tool = %previous.name,
                    "Duplicate tool name in discovery; keeping the last definition"
                );
            }
        }
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Sorted tool names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(ToolName::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// MCP listing entries, auth requirements carried in `_meta.auth`.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.iter().map(to_mcp_tool).collect()
    }
}

pub fn to_mcp_tool(def: &ToolDefinition) -> McpTool {
    let level = auth_level_of(def.auth());
    let scopes = def.auth().map(|a| a.scopes.clone()).unwrap_or_default();

    let mut meta = JsonObject::new();
    meta.insert(
        "auth".to_string(),
        json!({ "level": level, "scopes": scopes }),
    );

    let description = match (&def.description, level) {
        (Some(d), AuthLevel::Required) if !scopes.is_empty() => {
            format!("{} (requires login; scopes: {})", d, scopes.join(", "))
        }
        (Some(d), AuthLevel::Required) => format!("{} (requires login)", d),
        (Some(d), _) => d.clone(),
        (None, _) => String::new(),
    };

    McpTool {
        name: Cow::Owned(def.name.to_string()),
        title: None,
        description: Some(Cow::Owned(description)),
        input_schema: Arc::new(def.input_schema.clone()),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: Some(Meta(meta)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(value: serde_json::Value) -> ToolDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_lookup_and_sorted_names() {
        let catalog = ToolCatalog::new(vec![
            def(json!({"name": "node.update"})),
            def(json!({"name": "site.info"})),
            def(json!({"name": "node.read"})),
        ]);
        assert_eq!(
            catalog.names().collect::<Vec<_>>(),
            vec!["node.read", "node.update", "site.info"]
        );
        assert!(catalog.get("node.read").is_some());
        assert!(catalog.get("does.not.exist").is_none());
    }

    #[test]
    fn test_duplicate_keeps_last() {
        let catalog = ToolCatalog::new(vec![
            def(json!({"name": "a", "description": "first"})),
            def(json!({"name": "a", "description": "second"})),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("a").unwrap().description.as_deref(), Some("second"));
    }

    #[test]
    fn test_mcp_tool_carries_auth_meta() {
        let tool = to_mcp_tool(&def(json!({
            "name": "node.update",
            "description": "Update a node",
            "inputSchema": {"type": "object", "required": ["nid"]},
            "annotations": {"auth": {"scopes": ["content:write"]}}
        })));

        assert_eq!(tool.name, "node.update");
        assert_eq!(
            tool.description.as_deref(),
            Some("Update a node (requires login; scopes: content:write)")
        );
        let meta = tool.meta.unwrap();
        assert_eq!(meta.0["auth"]["level"], "required");
        assert_eq!(meta.0["auth"]["scopes"], json!(["content:write"]));
        assert_eq!(tool.input_schema.get("required"), Some(&json!(["nid"])));
    }

    #[test]
    fn test_unannotated_tool_is_level_none() {
        let tool = to_mcp_tool(&def(json!({"name": "site.info", "description": "Site info"})));
        assert_eq!(tool.description.as_deref(), Some("Site info"));
        assert_eq!(tool.meta.unwrap().0["auth"]["level"], "none");
    }
}
