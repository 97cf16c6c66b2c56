//! Per-call tool dispatch.
//!
//! Every `tools/call` goes through [`Dispatcher::handle_tool_call`]:
//!
//! 1. bridge-local `auth_*` tools are handled directly
//! 2. the tool is looked up in the discovery snapshot
//! 3. the session's token is resolved and the scope gate applied
//! 4. parameters are validated against the tool's `inputSchema`
//! 5. the call is forwarded to Drupal with the bearer token attached
//!
//! Authorization runs before validation so a denied caller never gets
//! feedback about parameter shape.


use std::collections::HashMap;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject, Tool as McpTool};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::auth::{AuthLevel, TokenRecord, auth_level_of, check_access};
use crate::drupal::{ToolDefinition, ToolExecutor};
use crate::error::{FieldError, ToolCallError};
use crate::session::{Authenticator, SessionStats};
use crate::tools::{ToolCatalog, ToolContext, ToolRegistry, auth_tool_registry, json_result};
use crate::types::{SessionId, ToolName, UserId};

/// Aggregate, identity-free view for `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub active_users: usize,
    pub active_sessions: usize,
}

pub struct Dispatcher {
    authenticator: Authenticator,
    builtins: ToolRegistry,
    catalog: ToolCatalog,
    validators: HashMap<ToolName, Result<jsonschema::Validator, String>>,
    executor: Arc<dyn ToolExecutor>,
}

impl Dispatcher {
    pub fn new(
        authenticator: Authenticator,
        catalog: ToolCatalog,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let builtins = auth_tool_registry(&authenticator);

        let mut validators = HashMap::with_capacity(catalog.len());
        for def in catalog.iter() {
            if builtins.contains(def.name.as_str()) {
                warn!(
                    tool = %def.name,
                    "Discovered tool shadows a built-in tool and will not be reachable"
                );
            }
            let schema = Value::Object(def.input_schema.clone());
            let validator = jsonschema::validator_for(&schema).map_err(|e| e.to_string());
            if let Err(e) = &validator {
                warn!(
                    tool = %def.name,
                    error = %e,
                    "Tool input schema does not compile; calls will be rejected"
                );
            }
            validators.insert(def.name.clone(), validator);
        }

        Self {
            authenticator,
            builtins,
            catalog,
            validators,
            executor,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Built-in tools first, then the catalog, each sorted by name.
    pub fn list_tools(&self) -> Vec<McpTool> {
        let mut tools = self.builtins.list_tools();
        tools.extend(
            self.catalog
                .list_tools()
                .into_iter()
                .filter(|t| !self.builtins.contains(&t.name)),
        );
        tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names = self.builtins.list_names();
        names.extend(
            self.catalog
                .names()
                .filter(|n| !self.builtins.contains(n))
                .map(str::to_string),
        );
        names
    }

    pub async fn handle_tool_call(
        &self,
        tool_name: &str,
        params: Option<JsonObject>,
        session_id: &SessionId,
    ) -> Result<CallToolResult, ToolCallError> {
        let args = params.unwrap_or_default();

        if let Some(handler) = self.builtins.get(tool_name) {
            debug!(tool = %tool_name, session_id = %session_id, "Calling built-in tool");
            let ctx = ToolContext {
                session_id: session_id.clone(),
            };
            return handler.execute(args, &ctx).await;
        }

        let Some(tool) = self.catalog.get(tool_name) else {
            warn!(tool = %tool_name, session_id = %session_id, "Unknown tool requested");
            return Err(ToolCallError::UnknownTool {
                name: tool_name.to_string(),
                available: self.tool_names(),
            });
        };

        let level = auth_level_of(tool.auth());
        let token = match level {
            AuthLevel::None => None,
            AuthLevel::Optional | AuthLevel::Required => {
                self.authenticator.store().resolve_token(session_id)
            }
        };

        check_access(tool.auth(), token.as_ref().map(TokenRecord::scopes)).map_err(|error| {
            info!(
                tool = %tool.name,
                session_id = %session_id,
                error = %error,
                "Tool call denied"
            );
            ToolCallError::Access {
                tool: tool.name.clone(),
                error,
            }
        })?;

        self.validate(tool, &args)?;

        if let Some(token) = &token
            && token.is_expired()
        {
            warn!(
                tool = %tool.name,
                session_id = %session_id,
                token = %token.fingerprint(),
                "Forwarding an expired token; the backend may reject it"
            );
        }

        debug!(
            tool = %tool.name,
            session_id = %session_id,
            level = %level,
            authenticated = token.is_some(),
            "Forwarding tool call"
        );

        let bearer = token.as_ref().map(TokenRecord::access_token);
        match self.executor.invoke(tool, Value::Object(args), bearer).await {
            Ok(result) => Ok(json_result(&result, false)),
            Err(e) => {
                warn!(
                    tool = %tool.name,
                    session_id = %session_id,
                    error = %e,
                    "Tool execution failed"
                );
                Ok(json_result(
                    &json!({ "status": "error", "reason": e.to_string() }),
                    true,
                ))
            }
        }
    }

    /// Transport teardown for one session. Tokens survive.
    pub fn on_session_closed(&self, session_id: &SessionId) {
        self.authenticator.on_session_closed(session_id);
    }

    pub fn stats(&self) -> SessionStats {
        self.authenticator.store().stats()
    }

    pub fn health(&self) -> HealthReport {
        let stats = self.stats();
        HealthReport {
            status: "ok",
            active_users: stats.active_users,
            active_sessions: stats.active_sessions,
        }
    }

    pub fn session_bindings(&self) -> Vec<(SessionId, UserId)> {
        self.authenticator.store().session_bindings()
    }

    fn validate(&self, tool: &ToolDefinition, args: &JsonObject) -> Result<(), ToolCallError> {
        let validator = match self.validators.get(&tool.name) {
            Some(Ok(validator)) => validator,
            Some(Err(e)) => {
                return Err(ToolCallError::Internal(format!(
                    "tool '{}' has an invalid input schema: {}",
                    tool.name, e
                )));
            }
            None => return Ok(()),
        };

        let instance = Value::Object(args.clone());
        let errors: Vec<FieldError> = validator
            .iter_errors(&instance)
            .map(|e| {
                let path = e.instance_path().to_string();
                FieldError {
                    field: if path.is_empty() {
                        "(root)".to_string()
                    } else {
                        path
                    },
                    message: e.to_string(),
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ToolCallError::InvalidParams {
                tool: tool.name.clone(),
                errors,
            })
        }
    }
}
