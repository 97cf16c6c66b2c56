//! OAuth 2.0 device authorization grant (RFC 8628).
//!
//! The only code in the bridge that talks to the authorization server.
//! Stateless between calls: all attempt state lives in the caller.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::auth::token::{TokenRecord, TokenResponse};
use crate::config::OAuthConfig;
use crate::types::{DeviceCode, UserCode};

pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Interval used when the server omits one (RFC 8628 section 3.2).
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

/// Added to the interval on every `slow_down` response.
const SLOW_DOWN_STEP_SECONDS: u64 = 5;

/// Upper bound on the device code lifetime a server may announce.
pub const MAX_DEVICE_CODE_LIFETIME_SECONDS: u64 = 3600;

/// Instructions for the user plus the device code the bridge polls with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChallenge {
    pub verification_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    pub user_code: UserCode,
    #[serde(skip_serializing)]
    pub device_code: DeviceCode,
    pub interval_seconds: u64,
    pub expires_in_seconds: u64,
    pub issued_at: DateTime<Utc>,
}

impl DeviceChallenge {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = i64::try_from(self.expires_in_seconds).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(lifetime)
            .and_then(|d| self.issued_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whole seconds of challenge lifetime left at `now`.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at() - now).num_seconds()).unwrap_or(0)
    }
}

/// Device authorization endpoint response.
#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

/// Token endpoint error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Device-flow failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFlowError {
    /// Network, HTTP or protocol failure talking to the authorization server.
    AuthServer(String),
    /// The challenge lifetime elapsed before the user approved.
    Timeout,
    /// The user (or server) explicitly denied the request.
    Denied,
}

impl fmt::Display for DeviceFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthServer(msg) => write!(f, "Authorization server error: {}", msg),
            Self::Timeout => write!(f, "Device code expired before authorization completed"),
            Self::Denied => write!(f, "Authorization was denied"),
        }
    }
}

impl std::error::Error for DeviceFlowError {}

pub type DeviceFlowFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DeviceFlowError>> + Send + 'a>>;

/// The device-flow handshake as consumed by the login orchestrator.
pub trait DeviceAuthorizer: Send + Sync {
    /// Request a new device code and user code.
    fn initiate(&self) -> DeviceFlowFuture<'_, DeviceChallenge>;

    /// Poll the token endpoint until the grant completes, is denied, or
    /// `expires_in_seconds` elapses. Callers pass the lifetime left on the
    /// challenge, not its original `expires_in`.
    fn poll_for_token<'a>(
        &'a self,
        device_code: &'a DeviceCode,
        interval_seconds: u64,
        expires_in_seconds: u64,
    ) -> DeviceFlowFuture<'a, TokenRecord>;
}

/// HTTP implementation of [`DeviceAuthorizer`].
pub struct DeviceAuthClient {
    client: reqwest::Client,
    device_authorization_url: String,
    token_url: String,
    client_id: String,
    scopes: Vec<String>,
}

impl DeviceAuthClient {
    pub fn new(config: &OAuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            device_authorization_url: config.device_authorization_url(),
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            scopes: config.scopes.clone(),
        })
    }

    async fn request_device_code(&self) -> Result<DeviceChallenge, DeviceFlowError> {
        let scope = self.scopes.join(" ");
        let response = self
            .client
            .post(&self.device_authorization_url)
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| {
                DeviceFlowError::AuthServer(format!("device authorization request failed: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                DeviceFlowError::AuthServer(format!("reading device authorization response: {}", e))
            })?;

        if !status.is_success() {
            return Err(DeviceFlowError::AuthServer(format!(
                "device authorization returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: DeviceAuthorizationResponse = serde_json::from_str(&body).map_err(|e| {
            DeviceFlowError::AuthServer(format!("parsing device authorization response: {}", e))
        })?;

        let expires_in = parsed.expires_in.min(MAX_DEVICE_CODE_LIFETIME_SECONDS);
        if expires_in < parsed.expires_in {
            warn!(
                announced = parsed.expires_in,
                capped = expires_in,
                "Device code lifetime capped"
            );
        }

        debug!(
            user_code = %parsed.user_code,
            expires_in,
            interval = parsed.interval,
            "Device authorization issued"
        );

        Ok(DeviceChallenge {
            verification_uri: parsed.verification_uri,
            verification_uri_complete: parsed.verification_uri_complete,
            user_code: UserCode::new(parsed.user_code),
            device_code: DeviceCode::new(parsed.device_code),
            interval_seconds: parsed.interval.min(expires_in),
            expires_in_seconds: expires_in,
            issued_at: Utc::now(),
        })
    }

    async fn poll(
        &self,
        device_code: &DeviceCode,
        interval_seconds: u64,
        expires_in_seconds: u64,
    ) -> Result<TokenRecord, DeviceFlowError> {
        let lifetime = expires_in_seconds.min(MAX_DEVICE_CODE_LIFETIME_SECONDS);
        let deadline = Instant::now() + Duration::from_secs(lifetime);
        let mut interval = interval_seconds;

        loop {
            let wake = Instant::now()
                .checked_add(Duration::from_secs(interval))
                .map_or(deadline, |t| t.min(deadline));
            tokio::time::sleep_until(wake).await;

            if Instant::now() >= deadline {
                return Err(DeviceFlowError::Timeout);
            }

            let response = self
                .client
                .post(&self.token_url)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT_TYPE),
                    ("device_code", device_code.as_str()),
                    ("client_id", self.client_id.as_str()),
                ])
                .send()
                .await
                .map_err(|e| {
                    DeviceFlowError::AuthServer(format!("token poll request failed: {}", e))
                })?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| {
                    DeviceFlowError::AuthServer(format!("reading token response: {}", e))
                })?;

            // Some servers answer pending with 200, so the error body wins.
            if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(&body) {
                match err.error.as_str() {
                    "authorization_pending" => continue,
                    "slow_down" => {
                        interval = interval.saturating_add(SLOW_DOWN_STEP_SECONDS);
                        debug!(interval, "Token endpoint asked to slow down");
                        continue;
                    }
                    "expired_token" => return Err(DeviceFlowError::Timeout),
                    "access_denied" => return Err(DeviceFlowError::Denied),
                    other => {
                        let desc = err
                            .error_description
                            .unwrap_or_else(|| "no description".to_string());
                        return Err(DeviceFlowError::AuthServer(format!(
                            "OAuth error '{}': {}",
                            other, desc
                        )));
                    }
                }
            }

            if !status.is_success() {
                return Err(DeviceFlowError::AuthServer(format!(
                    "token endpoint returned HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
                DeviceFlowError::AuthServer(format!("parsing token response: {}", e))
            })?;
            return Ok(token.into_record(&self.scopes));
        }
    }
}

impl DeviceAuthorizer for DeviceAuthClient {
    fn initiate(&self) -> DeviceFlowFuture<'_, DeviceChallenge> {
        Box::pin(self.request_device_code())
    }

    fn poll_for_token<'a>(
        &'a self,
        device_code: &'a DeviceCode,
        interval_seconds: u64,
        expires_in_seconds: u64,
    ) -> DeviceFlowFuture<'a, TokenRecord> {
        Box::pin(self.poll(device_code, interval_seconds, expires_in_seconds))
    }
}
