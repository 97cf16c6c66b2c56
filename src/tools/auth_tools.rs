//! Handlers for the `auth_login`, `auth_status` and `auth_logout` tools.

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::session::{AuthStatus, Authenticator, LoginOutcome};
use crate::tools::{ToolContext, ToolFuture, ToolHandler, json_result};

pub const AUTH_LOGIN: &str = "auth_login";
pub const AUTH_STATUS: &str = "auth_status";
pub const AUTH_LOGOUT: &str = "auth_logout";

/// Handler for the `auth_login` tool.
pub struct AuthLoginHandler {
    authenticator: Authenticator,
}

impl AuthLoginHandler {
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

impl ToolHandler for AuthLoginHandler {
    fn name(&self) -> &str {
        AUTH_LOGIN
    }

    fn title(&self) -> Option<&str> {
        Some("Sign in to Drupal")
    }

    fn description(&self) -> &str {
        "Start a device login. Returns a URL and a code for the user to enter in a browser. \
         Calling again while the login is pending returns the same code. \
         Use auth_status to check when sign-in has completed."
    }

    fn execute<'a>(&'a self, _args: JsonObject, ctx: &'a ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let outcome = self.authenticator.login(&ctx.session_id).await?;
            let challenge = outcome.challenge();
            let visit = challenge
                .verification_uri_complete
                .as_deref()
                .unwrap_or(&challenge.verification_uri);

            Ok(json_result(
                &json!({
                    "status": "pending",
                    "resumed": matches!(outcome, LoginOutcome::InProgress(_)),
                    "message": format!(
                        "Open {} and enter code {} to sign in, then call auth_status.",
                        visit, challenge.user_code
                    ),
                    "verificationUri": challenge.verification_uri,
                    "verificationUriComplete": challenge.verification_uri_complete,
                    "userCode": challenge.user_code,
                    "expiresAt": challenge.expires_at(),
                }),
                false,
            ))
        })
    }
}

/// Handler for the `auth_status` tool.
pub struct AuthStatusHandler {
    authenticator: Authenticator,
}

impl AuthStatusHandler {
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

impl ToolHandler for AuthStatusHandler {
    fn name(&self) -> &str {
        AUTH_STATUS
    }

    fn title(&self) -> Option<&str> {
        Some("Sign-in status")
    }

    fn description(&self) -> &str {
        "Report whether this session is signed in, waiting for browser approval, or failed."
    }

    fn execute<'a>(&'a self, _args: JsonObject, ctx: &'a ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let status = self.authenticator.status(&ctx.session_id);
            let is_error = matches!(status, AuthStatus::Failed { .. });
            let value = serde_json::to_value(&status)
                .map_err(|e| anyhow::anyhow!("serializing auth status: {}", e))?;
            Ok(json_result(&value, is_error))
        })
    }
}

/// Handler for the `auth_logout` tool.
pub struct AuthLogoutHandler {
    authenticator: Authenticator,
}

impl AuthLogoutHandler {
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

impl ToolHandler for AuthLogoutHandler {
    fn name(&self) -> &str {
        AUTH_LOGOUT
    }

    fn title(&self) -> Option<&str> {
        Some("Sign out")
    }

    fn description(&self) -> &str {
        "Sign out and discard the stored token for this session's user."
    }

    fn execute<'a>(&'a self, _args: JsonObject, ctx: &'a ToolContext) -> ToolFuture<'a> {
        Box::pin(async move {
            let result: CallToolResult = match self.authenticator.logout(&ctx.session_id) {
                Some(user_id) => json_result(
                    &json!({ "status": "logged_out", "userId": user_id }),
                    false,
                ),
                None => json_result(&json!({ "status": "not_authenticated" }), false),
            };
            Ok(result)
        })
    }
}
