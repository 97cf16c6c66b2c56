//! Errors crossing the tool-call boundary, with their MCP error mapping.
//!
//! Codes:
//! - `-32001`: authentication or authorization required (login, scopes)
//! - `-32602`: unknown tool or invalid parameters
//! - `-32603`: internal failure

use std::fmt;

use rmcp::model::ErrorCode;
use serde::Serialize;
use serde_json::json;

use crate::auth::AccessError;
use crate::session::LoginError;
use crate::types::ToolName;

/// MCP error code for authentication and authorization failures.
pub const AUTH_REQUIRED_ERROR_CODE: i32 = -32001;

/// One schema violation, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallError {
    UnknownTool {
        name: String,
        available: Vec<String>,
    },
    InvalidParams {
        tool: ToolName,
        errors: Vec<FieldError>,
    },
    Access {
        tool: ToolName,
        error: AccessError,
    },
    Login(LoginError),
    Internal(String),
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name, available } => write!(
                f,
                "Unknown tool '{}'. Available tools: {}",
                name,
                available.join(", ")
            ),
            Self::InvalidParams { tool, errors } => {
                let fields: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect();
                write!(f, "Invalid parameters for '{}': {}", tool, fields.join("; "))
            }
            Self::Access { tool, error } => write!(f, "{} (tool '{}')", error, tool),
            Self::Login(e) => write!(f, "{}", e),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ToolCallError {}

impl From<LoginError> for ToolCallError {
    fn from(err: LoginError) -> Self {
        Self::Login(err)
    }
}

impl From<anyhow::Error> for ToolCallError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl ToolCallError {
    pub fn to_mcp_error(&self) -> rmcp::ErrorData {
        let message = self.to_string();
        match self {
            Self::UnknownTool { name, available } => rmcp::ErrorData::invalid_params(
                message,
                Some(json!({ "tool": name, "availableTools": available })),
            ),
            Self::InvalidParams { tool, errors } => rmcp::ErrorData::invalid_params(
                message,
                Some(json!({ "tool": tool, "errors": errors })),
            ),
            Self::Access {
                tool,
                error: AccessError::Unauthenticated,
            } => rmcp::ErrorData::new(
                ErrorCode(AUTH_REQUIRED_ERROR_CODE),
                message,
                Some(json!({ "tool": tool, "reason": "unauthenticated" })),
            ),
            Self::Access {
                tool,
                error:
                    AccessError::AccessDenied {
                        required,
                        missing,
                        current,
                    },
            } => rmcp::ErrorData::new(
                ErrorCode(AUTH_REQUIRED_ERROR_CODE),
                message,
                Some(json!({
                    "tool": tool,
                    "reason": "insufficient_scope",
                    "requiredScopes": required,
                    "missingScopes": missing,
                    "currentScopes": current,
                })),
            ),
            Self::Login(LoginError::AlreadyAuthenticated(user_id)) => {
                rmcp::ErrorData::invalid_request(message, Some(json!({ "userId": user_id })))
            }
            Self::Login(LoginError::Flow(_)) => rmcp::ErrorData::new(
                ErrorCode(AUTH_REQUIRED_ERROR_CODE),
                format!("{}. Call auth_login to try again.", message),
                None,
            ),
            Self::Internal(_) => rmcp::ErrorData::internal_error(message, None),
        }
    }
}
