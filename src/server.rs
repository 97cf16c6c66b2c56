//! MCP server implementation using rmcp.
//!
//! One [`McpServer`] exists per MCP session: stdio runs a single one for the
//! process lifetime, streamable HTTP builds one per `Mcp-Session-Id` through
//! the service factory. Each instance owns a fresh [`SessionId`] and a
//! [`SessionGuard`] that reports the session closed when the last clone of
//! the handler is dropped.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer, ServiceExt},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::types::SessionId;

/// Fires `on_session_closed` exactly once, when the transport drops the
/// session's handler.
pub struct SessionGuard {
    session_id: SessionId,
    dispatcher: Arc<Dispatcher>,
}

impl SessionGuard {
    pub fn new(session_id: SessionId, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            session_id,
            dispatcher,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "MCP session closed");
        self.dispatcher.on_session_closed(&self.session_id);
    }
}

/// MCP server that handles protocol requests and delegates to the dispatcher.
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    session: Arc<SessionGuard>,
}

impl McpServer {
    /// Create a handler for a new transport session.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let session_id = SessionId::new(Uuid::new_v4().to_string());
        debug!(session_id = %session_id, "MCP session opened");
        Self {
            session: Arc::new(SessionGuard::new(session_id, dispatcher.clone())),
            dispatcher,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.session_id()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl ServerHandler for McpServer {
    fn ping(
        &self,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<(), McpError>> + Send + '_ {
        std::future::ready(Ok(()))
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let result = ListToolsResult {
            tools: self.dispatcher.list_tools(),
            next_cursor: None,
            ..Default::default()
        };
        std::future::ready(Ok(result))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments;

        async move {
            self.dispatcher
                .handle_tool_call(&tool_name, args, self.session_id())
                .await
                .map_err(|e| e.to_mcp_error())
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Drupal tools over MCP. Tools marked as requiring login need a signed-in \
                 session: call auth_login, open the returned URL, enter the code, then \
                 check auth_status. Sign-in survives reconnects until auth_logout."
                    .to_string(),
            ),
        }
    }
}

/// Run one MCP session over stdin/stdout until the client disconnects.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let server = McpServer::new(dispatcher);
    info!(session_id = %server.session_id(), "Starting MCP stdio session");

    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

    // Block until the MCP session ends; dropping the service closes the session.
    service.waiting().await?;
    info!("MCP stdio session ended");
    Ok(())
}

/// Build the HTTP application: MCP at `/mcp` plus the health endpoints.
pub fn create_http_app(dispatcher: Arc<Dispatcher>, debug_sessions: bool) -> Router {
    let service = StreamableHttpService::new(
        {
            let dispatcher = dispatcher.clone();
            move || Ok(McpServer::new(dispatcher.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    Router::new()
        .nest_service("/mcp", service)
        .merge(crate::api::create_router(dispatcher, debug_sessions))
}

/// Start the bridge as an MCP Streamable HTTP server.
///
/// This exposes the MCP endpoint at `/mcp` on the given bind address,
/// e.g. `127.0.0.1:3942` or `0.0.0.0:3942`, with `/health` (and, when
/// enabled, `/debug/sessions`) on the same listener.
pub async fn start_mcp_http(
    dispatcher: Arc<Dispatcher>,
    bind: &str,
    debug_sessions: bool,
) -> Result<()> {
    let router = create_http_app(dispatcher, debug_sessions);
    let listener = tokio::net::TcpListener::bind(bind).await?;

    if debug_sessions {
        tracing::warn!(
            "MCP HTTP server listening on http://{} (debug session endpoint enabled)",
            bind
        );
    } else {
        tracing::info!("MCP HTTP server listening on http://{}", bind);
    }

    axum::serve(listener, router).await?;

    Ok(())
}
