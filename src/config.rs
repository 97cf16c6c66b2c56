use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

use crate::auth::jwks::DEFAULT_CACHE_TTL_SECONDS;

/// Fully resolved bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the Drupal site exposing `/tools/list` and `/jsonrpc`.
    pub drupal_url: String,
    pub oauth: OAuthConfig,
    /// Expose `/debug/sessions` on the HTTP listener. Local development only.
    #[serde(default)]
    pub debug_sessions: bool,
}

/// OAuth authorization server settings for the device flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Base URL; `/device_authorization` and `/token` are appended.
    pub server_url: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// JWKS endpoint. When set, granted tokens are signature-checked.
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,
}

fn default_jwks_cache_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

impl OAuthConfig {
    pub fn device_authorization_url(&self) -> String {
        format!("{}/device_authorization", self.server_url.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.server_url.trim_end_matches('/'))
    }
}

/// Config file shape. Every field is optional so CLI flags can fill gaps.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    #[serde(default)]
    drupal_url: Option<String>,
    #[serde(default)]
    oauth: FileOAuthConfig,
    #[serde(default)]
    debug_sessions: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileOAuthConfig {
    #[serde(default)]
    server_url: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default)]
    jwks_url: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    audience: Option<String>,
    #[serde(default)]
    jwks_cache_seconds: Option<u64>,
}

/// Values supplied on the command line (or their env fallbacks).
/// These win over the config file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub drupal_url: Option<String>,
    pub oauth_server_url: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_scopes: Option<Vec<String>>,
    pub jwks_url: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub debug_sessions: bool,
}

impl ConfigOverrides {
    fn merge_file(self, file: FileConfig) -> ConfigOverrides {
        let oauth = file.oauth;
        ConfigOverrides {
            drupal_url: self.drupal_url.or(file.drupal_url),
            oauth_server_url: self.oauth_server_url.or(oauth.server_url),
            oauth_client_id: self.oauth_client_id.or(oauth.client_id),
            oauth_scopes: self.oauth_scopes.or(oauth.scopes),
            jwks_url: self.jwks_url.or(oauth.jwks_url),
            jwt_issuer: self.jwt_issuer.or(oauth.issuer),
            jwt_audience: self.jwt_audience.or(oauth.audience),
            debug_sessions: self.debug_sessions || file.debug_sessions.unwrap_or(false),
        }
    }

    fn into_config(self, jwks_cache_seconds: Option<u64>) -> anyhow::Result<BridgeConfig> {
        let drupal_url = self
            .drupal_url
            .ok_or_else(|| anyhow::anyhow!("Drupal base URL is required (--drupal-url)"))?;
        let server_url = self.oauth_server_url.ok_or_else(|| {
            anyhow::anyhow!("OAuth server URL is required (--oauth-server-url)")
        })?;
        let client_id = self
            .oauth_client_id
            .ok_or_else(|| anyhow::anyhow!("OAuth client id is required (--oauth-client-id)"))?;

        validate_url("drupal_url", &drupal_url)?;
        validate_url("oauth.server_url", &server_url)?;
        if let Some(jwks) = &self.jwks_url {
            validate_url("oauth.jwks_url", jwks)?;
        }

        Ok(BridgeConfig {
            drupal_url: drupal_url.trim_end_matches('/').to_string(),
            oauth: OAuthConfig {
                server_url,
                client_id,
                scopes: self.oauth_scopes.unwrap_or_default(),
                jwks_url: self.jwks_url,
                issuer: self.jwt_issuer,
                audience: self.jwt_audience,
                jwks_cache_seconds: jwks_cache_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            },
            debug_sessions: self.debug_sessions,
        })
    }
}

fn validate_url(field: &str, value: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| anyhow::anyhow!("`{}` is not a valid URL ({}): {}", field, value, e))?;
    if !["http", "https"].contains(&parsed.scheme()) {
        return Err(anyhow::anyhow!("`{}` must use http or https: {}", field, value));
    }
    Ok(())
}

/// Locate the optional config file.
///
/// An explicit `DRUPAL_MCP_CONFIG` must exist; the fallback locations are
/// only used when present.
pub fn resolve_config_path() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(p) = env::var("DRUPAL_MCP_CONFIG") {
        let path = PathBuf::from(p);
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "DRUPAL_MCP_CONFIG points to a missing file: {}",
                path.display()
            ));
        }
        return Ok(Some(path));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("drupal-mcp").join("config.json");
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }

    let candidate = PathBuf::from("drupal-mcp.json");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_file(cfg: FileConfig) -> FileConfig {
    let expand = |v: Option<String>| v.map(|s| expand_env_vars(&s));
    let oauth = cfg.oauth;
    FileConfig {
        drupal_url: expand(cfg.drupal_url),
        oauth: FileOAuthConfig {
            server_url: expand(oauth.server_url),
            client_id: expand(oauth.client_id),
            scopes: oauth
                .scopes
                .map(|s| s.iter().map(|v| expand_env_vars(v)).collect()),
            jwks_url: expand(oauth.jwks_url),
            issuer: expand(oauth.issuer),
            audience: expand(oauth.audience),
            jwks_cache_seconds: oauth.jwks_cache_seconds,
        },
        debug_sessions: cfg.debug_sessions,
    }
}

fn read_file_config(path: &PathBuf) -> anyhow::Result<FileConfig> {
    let raw = fs::read_to_string(path)?;
    let cfg: FileConfig = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", path.display(), e))?;
    Ok(expand_file(cfg))
}

/// Resolve configuration from an optional file plus command-line overrides.
pub fn load_config(
    path: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> anyhow::Result<BridgeConfig> {
    let file = match path {
        Some(p) => {
            tracing::info!("Loading configuration from {}", p.display());
            read_file_config(&p)?
        }
        None => FileConfig::default(),
    };
    let jwks_cache_seconds = file.oauth.jwks_cache_seconds;
    overrides.merge_file(file).into_config(jwks_cache_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"{
                "drupalUrl": "https://drupal.example.com/",
                "oauth": {
                    "serverUrl": "https://drupal.example.com/oauth",
                    "clientId": "mcp",
                    "scopes": ["content:read", "content:write"]
                },
                "debugSessions": true
            }"#,
        );

        let cfg = load_config(Some(file.path().to_path_buf()), ConfigOverrides::default())
            .unwrap();
        assert_eq!(cfg.drupal_url, "https://drupal.example.com");
        assert_eq!(cfg.oauth.client_id, "mcp");
        assert_eq!(cfg.oauth.scopes.len(), 2);
        assert!(cfg.debug_sessions);
        assert_eq!(cfg.oauth.jwks_cache_seconds, DEFAULT_CACHE_TTL_SECONDS);
        assert_eq!(
            cfg.oauth.token_url(),
            "https://drupal.example.com/oauth/token"
        );
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file = write_config(
            r#"{
                "drupalUrl": "https://file.example.com",
                "oauth": { "serverUrl": "https://file.example.com/oauth", "clientId": "file" }
            }"#,
        );
        let overrides = ConfigOverrides {
            oauth_client_id: Some("cli".to_string()),
            ..Default::default()
        };

        let cfg = load_config(Some(file.path().to_path_buf()), overrides).unwrap();
        assert_eq!(cfg.oauth.client_id, "cli");
        assert_eq!(cfg.drupal_url, "https://file.example.com");
    }

    #[test]
    fn test_missing_required_field() {
        let overrides = ConfigOverrides {
            drupal_url: Some("https://drupal.example.com".to_string()),
            ..Default::default()
        };
        let err = load_config(None, overrides).unwrap_err();
        assert!(err.to_string().contains("OAuth server URL"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let overrides = ConfigOverrides {
            drupal_url: Some("not a url".to_string()),
            oauth_server_url: Some("https://auth.example.com".to_string()),
            oauth_client_id: Some("mcp".to_string()),
            ..Default::default()
        };
        let err = load_config(None, overrides).unwrap_err();
        assert!(err.to_string().contains("drupal_url"));
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-local variable name, not read concurrently elsewhere.
        unsafe { env::set_var("DRUPAL_MCP_TEST_CLIENT", "from-env") };
        assert_eq!(expand_env_vars("${DRUPAL_MCP_TEST_CLIENT}"), "from-env");
        assert_eq!(
            expand_env_vars("x-${DRUPAL_MCP_TEST_UNSET_VAR}"),
            "x-${DRUPAL_MCP_TEST_UNSET_VAR}"
        );
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_oauth_endpoints_trim_slash() {
        let oauth = OAuthConfig {
            server_url: "https://auth.example.com/oauth/".to_string(),
            client_id: "mcp".to_string(),
            scopes: vec![],
            jwks_url: None,
            issuer: None,
            audience: None,
            jwks_cache_seconds: 60,
        };
        assert_eq!(
            oauth.device_authorization_url(),
            "https://auth.example.com/oauth/device_authorization"
        );
    }
}
