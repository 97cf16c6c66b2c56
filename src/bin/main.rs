use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drupal_mcp_bridge::auth::auth_level_of;
use drupal_mcp_bridge::{
    BridgeConfig, ConfigOverrides, create_dispatcher, discover_tools, load_config,
    resolve_config_path, serve_stdio, start_mcp_http,
};

#[derive(Parser)]
#[command(name = "drupal-mcp-bridge")]
#[command(about = "MCP server exposing Drupal tools behind OAuth device login")]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON config file (otherwise DRUPAL_MCP_CONFIG or the default locations)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    /// Base URL of the Drupal site
    #[arg(long, global = true, env = "DRUPAL_BASE_URL")]
    drupal_url: Option<String>,
    /// OAuth authorization server base URL
    #[arg(long, global = true, env = "OAUTH_SERVER_URL")]
    oauth_server_url: Option<String>,
    #[arg(long, global = true, env = "OAUTH_CLIENT_ID")]
    oauth_client_id: Option<String>,
    /// Space- or comma-separated scopes to request
    #[arg(long, global = true, env = "OAUTH_SCOPES")]
    oauth_scopes: Option<String>,
    /// JWKS endpoint for verifying granted tokens
    #[arg(long, global = true, env = "OAUTH_JWKS_URL")]
    jwks_url: Option<String>,
    #[arg(long, global = true, env = "OAUTH_JWT_ISSUER")]
    jwt_issuer: Option<String>,
    #[arg(long, global = true, env = "OAUTH_JWT_AUDIENCE")]
    jwt_audience: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in mcp.json)
    McpStdio,
    /// Run as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3942
        #[arg(long, default_value = "127.0.0.1:3942")]
        bind: String,
        /// Expose session -> user bindings at /debug/sessions (local development only)
        #[arg(long, default_value_t = false)]
        debug_sessions: bool,
    },
    /// Print the discovered Drupal tools with their auth requirements
    ListTools,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP protocol in stdio mode.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("drupal_mcp_bridge=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let debug_sessions = matches!(
        cli.command,
        Commands::McpHttp {
            debug_sessions: true,
            ..
        }
    );
    let config = build_config(cli.config, debug_sessions)?;

    match cli.command {
        Commands::McpStdio => {
            info!("Starting MCP stdio server for {}", config.drupal_url);
            let dispatcher = create_dispatcher(&config).await?;
            serve_stdio(dispatcher).await?;
        }
        Commands::McpHttp { bind, .. } => {
            info!("Starting MCP HTTP server on {} for {}", bind, config.drupal_url);
            let dispatcher = create_dispatcher(&config).await?;
            start_mcp_http(dispatcher, &bind, config.debug_sessions).await?;
        }
        Commands::ListTools => {
            let catalog = discover_tools(&config).await?;
            if catalog.is_empty() {
                println!("No tools discovered at {}", config.drupal_url);
                return Ok(());
            }

            println!("{:<32} {:<10} {}", "TOOL", "AUTH", "SCOPES");
            println!("{}", "-".repeat(72));
            for tool in catalog.iter() {
                let scopes = tool
                    .auth()
                    .map(|a| a.scopes.join(" "))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<32} {:<10} {}",
                    tool.name.as_str(),
                    auth_level_of(tool.auth()).as_str(),
                    scopes
                );
            }
        }
    }

    Ok(())
}

fn build_config(args: ConfigArgs, debug_sessions: bool) -> Result<BridgeConfig> {
    let path = match args.config {
        Some(path) => Some(path),
        None => resolve_config_path()?,
    };

    let overrides = ConfigOverrides {
        drupal_url: args.drupal_url,
        oauth_server_url: args.oauth_server_url,
        oauth_client_id: args.oauth_client_id,
        oauth_scopes: args.oauth_scopes.map(|s| {
            s.split([' ', ','])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }),
        jwks_url: args.jwks_url,
        jwt_issuer: args.jwt_issuer,
        jwt_audience: args.jwt_audience,
        debug_sessions,
    };

    load_config(path, overrides)
}
