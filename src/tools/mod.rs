//! Tools exposed over MCP.
//!
//! Two sources: bridge-local handlers (the `auth_*` tools) registered in a
//! [`ToolRegistry`], and the Drupal tools discovered at startup, held in a
//! [`ToolCatalog`].

mod auth_tools;
mod catalog;
mod registry;

pub use auth_tools::{
    AUTH_LOGIN, AUTH_LOGOUT, AUTH_STATUS, AuthLoginHandler, AuthLogoutHandler, AuthStatusHandler,
};
pub use catalog::{ToolCatalog, to_mcp_tool};
pub use registry::{ToolContext, ToolFuture, ToolHandler, ToolRegistry};

use rmcp::model::{CallToolResult, Content};
use serde_json::Value;

use crate::session::Authenticator;

/// Registry holding the three auth tools.
pub fn auth_tool_registry(authenticator: &Authenticator) -> ToolRegistry {
    ToolRegistry::new()
        .register_handler(AuthLoginHandler::new(authenticator.clone()))
        .register_handler(AuthStatusHandler::new(authenticator.clone()))
        .register_handler(AuthLogoutHandler::new(authenticator.clone()))
}

/// Wrap a JSON value as a single text content block.
pub(crate) fn json_result(value: &Value, is_error: bool) -> CallToolResult {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult {
        content: vec![Content::text(text)],
        structured_content: None,
        is_error: Some(is_error),
        meta: None,
    }
}
