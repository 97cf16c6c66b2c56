use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ExecutorError, ExecutorFuture, ToolDefinition, ToolExecutor};

/// HTTP client for a Drupal site exposing MCP tools.
pub struct DrupalClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ToolListResponse {
    #[serde(default)]
    tools: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    /// `Some(Value::Null)` for an explicit `"result": null`.
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl DrupalClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn jsonrpc_url(&self) -> String {
        format!("{}/jsonrpc", self.base_url)
    }

    /// Fetch the tool catalog. Entries that do not parse are skipped.
    pub async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
        let url = format!("{}/tools/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("tool discovery at {} returned HTTP {}: {}", url, status.as_u16(), body);
        }

        let listing: ToolListResponse = response.json().await?;
        let mut tools = Vec::with_capacity(listing.tools.len());
        for raw in listing.tools {
            match serde_json::from_value::<ToolDefinition>(raw) {
                Ok(tool) => tools.push(tool),
                Err(e) => warn!(error = %e, "Skipping malformed tool definition"),
            }
        }

        debug!(count = tools.len(), "Discovered Drupal tools");
        Ok(tools)
    }

    async fn call(
        &self,
        tool: &ToolDefinition,
        params: Value,
        bearer_token: Option<&str>,
    ) -> Result<Value, ExecutorError> {
        let url = tool.endpoint.clone().unwrap_or_else(|| self.jsonrpc_url());
        let body = json!({
            "jsonrpc": "2.0",
            "method": tool.name.as_str(),
            "params": params,
            "id": Uuid::new_v4().to_string(),
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        // JSON-RPC errors may arrive with a non-2xx status; prefer the body.
        match serde_json::from_str::<JsonRpcResponse>(&text) {
            Ok(JsonRpcResponse {
                error: Some(error), ..
            }) => Err(ExecutorError::Remote {
                code: error.code,
                message: error.message,
            }),
            Ok(JsonRpcResponse {
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            _ if !status.is_success() => Err(ExecutorError::Http {
                status: status.as_u16(),
                body: text,
            }),
            Ok(_) => Err(ExecutorError::InvalidResponse(
                "response carries neither result nor error".to_string(),
            )),
            Err(e) => Err(ExecutorError::InvalidResponse(e.to_string())),
        }
    }
}

impl ToolExecutor for DrupalClient {
    fn invoke<'a>(
        &'a self,
        tool: &'a ToolDefinition,
        params: Value,
        bearer_token: Option<&'a str>,
    ) -> ExecutorFuture<'a> {
        Box::pin(self.call(tool, params, bearer_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn tool(name: &str) -> ToolDefinition {
        serde_json::from_value(json!({"name": name})).unwrap()
    }

    async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Json(json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "result": {
                "method": body["method"],
                "params": body["params"],
                "authorization": auth,
            }
        }))
    }

    #[tokio::test]
    async fn test_list_tools_skips_malformed_entries() {
        let router = Router::new().route(
            "/tools/list",
            get(|| async {
                Json(json!({
                    "tools": [
                        {"name": "node.read", "annotations": {"auth": {"scopes": ["content:read"]}}},
                        {"description": "no name"},
                        {"name": "site.info"}
                    ]
                }))
            }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&format!("{}/", base)).unwrap();

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["node.read", "site.info"]);
        assert!(tools[0].auth().is_some());
    }

    #[tokio::test]
    async fn test_list_tools_http_error() {
        let router = Router::new().route(
            "/tools/list",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_invoke_sends_jsonrpc_with_bearer() {
        let router = Router::new().route("/jsonrpc", post(echo));
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let result = client
            .invoke(&tool("node.read"), json!({"nid": 7}), Some("tok-1"))
            .await
            .unwrap();

        assert_eq!(result["method"], "node.read");
        assert_eq!(result["params"], json!({"nid": 7}));
        assert_eq!(result["authorization"], "Bearer tok-1");
    }

    #[tokio::test]
    async fn test_invoke_without_token_sends_no_header() {
        let router = Router::new().route("/jsonrpc", post(echo));
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let result = client
            .invoke(&tool("site.info"), json!({}), None)
            .await
            .unwrap();
        assert!(result["authorization"].is_null());
    }

    #[tokio::test]
    async fn test_invoke_null_result_is_success() {
        let router = Router::new().route(
            "/jsonrpc",
            post(|| async { Json(json!({"jsonrpc": "2.0", "result": null, "id": "1"})) }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let result = client
            .invoke(&tool("node.delete"), json!({"nid": 7}), Some("tok-1"))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_invoke_missing_result_is_invalid() {
        let router = Router::new().route(
            "/jsonrpc",
            post(|| async { Json(json!({"jsonrpc": "2.0", "id": "1"})) }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let err = client
            .invoke(&tool("node.delete"), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_invoke_uses_tool_endpoint() {
        let router = Router::new().route("/custom/endpoint", post(echo));
        let base = spawn_server(router).await;
        let client = DrupalClient::new("http://127.0.0.1:1").unwrap();

        let mut def = tool("custom.tool");
        def.endpoint = Some(format!("{}/custom/endpoint", base));
        let result = client.invoke(&def, json!({}), None).await.unwrap();
        assert_eq!(result["method"], "custom.tool");
    }

    #[tokio::test]
    async fn test_invoke_remote_error() {
        let router = Router::new().route(
            "/jsonrpc",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": "1",
                        "error": {"code": -32000, "message": "Node 7 not found"}
                    })),
                )
            }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let err = client
            .invoke(&tool("node.read"), json!({"nid": 7}), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Remote {
                code: -32000,
                message: "Node 7 not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_http_error_without_jsonrpc_body() {
        let router = Router::new().route(
            "/jsonrpc",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "fatal error") }),
        );
        let base = spawn_server(router).await;
        let client = DrupalClient::new(&base).unwrap();

        let err = client
            .invoke(&tool("node.read"), json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Http {
                status: 500,
                body: "fatal error".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_unreachable_backend() {
        let client = DrupalClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .invoke(&tool("node.read"), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Transport(_)));
    }
}
