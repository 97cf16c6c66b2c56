pub mod api;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod drupal;
pub mod error;
pub mod server;
pub mod session;
pub mod tools;
pub mod types;

pub use config::{BridgeConfig, ConfigOverrides, OAuthConfig, load_config, resolve_config_path};
pub use dispatcher::{Dispatcher, HealthReport};
pub use error::ToolCallError;
pub use server::{McpServer, serve_stdio, start_mcp_http};
pub use session::{Authenticator, SessionStore};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use auth::{DeviceAuthClient, JwksVerifier};
use drupal::DrupalClient;
use tools::ToolCatalog;

/// Discover the Drupal tool catalog.
pub async fn discover_tools(config: &BridgeConfig) -> Result<ToolCatalog> {
    let drupal = DrupalClient::new(&config.drupal_url)?;
    let tools = drupal
        .list_tools()
        .await
        .with_context(|| format!("discovering tools from {}", drupal.base_url()))?;
    Ok(ToolCatalog::new(tools))
}

/// Convenience function to create a fully wired dispatcher.
///
/// Discovers the tool catalog once, then builds the session store, login
/// orchestrator and Drupal executor around it.
pub async fn create_dispatcher(config: &BridgeConfig) -> Result<Arc<Dispatcher>> {
    let catalog = discover_tools(config).await?;
    info!(tools = catalog.len(), "Tool catalog loaded");

    let verifier = JwksVerifier::from_config(&config.oauth)?.map(Arc::new);
    if verifier.is_some() {
        info!("Granted tokens will be signature-checked against JWKS");
    }

    let store = Arc::new(SessionStore::new());
    let authorizer = Arc::new(DeviceAuthClient::new(&config.oauth)?);
    let authenticator = Authenticator::new(store, authorizer, verifier);
    let executor = Arc::new(DrupalClient::new(&config.drupal_url)?);

    Ok(Arc::new(Dispatcher::new(authenticator, catalog, executor)))
}
