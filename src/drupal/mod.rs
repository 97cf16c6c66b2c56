//! Drupal tool backend: discovery (`/tools/list`) and JSON-RPC invocation.

mod client;

pub use client::DrupalClient;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::ToolAuthMetadata;
use crate::types::ToolName;

/// A tool as advertised by the Drupal discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: ToolName,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: JsonObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
    /// Invocation URL override; defaults to the site's JSON-RPC endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ToolDefinition {
    pub fn auth(&self) -> Option<&ToolAuthMetadata> {
        self.annotations.as_ref().and_then(|a| a.auth.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ToolAuthMetadata>,
    /// Anything else Drupal puts here, carried through untouched.
    #[serde(flatten)]
    pub extra: JsonObject,
}

fn empty_object_schema() -> JsonObject {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema
}

/// Failure reported by (or while talking to) the tool backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    Transport(String),
    Http { status: u16, body: String },
    /// JSON-RPC error object returned by the backend.
    Remote { code: i64, message: String },
    InvalidResponse(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Tool backend unreachable: {}", msg),
            Self::Http { status, body } => {
                write!(f, "Tool backend returned HTTP {}: {}", status, body)
            }
            Self::Remote { message, .. } => write!(f, "{}", message),
            Self::InvalidResponse(msg) => write!(f, "Invalid tool backend response: {}", msg),
        }
    }
}

impl std::error::Error for ExecutorError {}

pub type ExecutorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, ExecutorError>> + Send + 'a>>;

/// Executes a discovered tool on the backend.
pub trait ToolExecutor: Send + Sync {
    fn invoke<'a>(
        &'a self,
        tool: &'a ToolDefinition,
        params: Value,
        bearer_token: Option<&'a str>,
    ) -> ExecutorFuture<'a>;
}
