//! Signature verification of granted access tokens against a JWKS endpoint.
//!
//! Optional: only used when `oauth.jwks_url` is configured. Keys are cached
//! by `kid` and refreshed after the TTL; a stale set is still used for up to
//! a day when the endpoint is unreachable.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::OAuthConfig;

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Default)]
struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

/// Verifies RS256 access tokens issued by the authorization server.
pub struct JwksVerifier {
    jwks_url: String,
    issuer: Option<String>,
    audience: Option<String>,
    cache_ttl: Duration,
    key_set: RwLock<KeySet>,
    client: reqwest::Client,
}

impl JwksVerifier {
    /// Build a verifier if the config names a JWKS endpoint.
    pub fn from_config(config: &OAuthConfig) -> anyhow::Result<Option<Self>> {
        let Some(jwks_url) = config.jwks_url.clone() else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Some(Self {
            jwks_url,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            cache_ttl: Duration::from_secs(config.jwks_cache_seconds),
            key_set: RwLock::new(KeySet::default()),
            client,
        }))
    }

    /// Check the token's signature, expiry, issuer and audience.
    pub async fn verify(&self, token: &str) -> Result<(), JwksError> {
        let header = decode_header(token)
            .map_err(|e| JwksError::InvalidToken(format!("invalid header: {}", e)))?;
        let key = self.key_for(header.kid.as_deref()).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        decode::<Value>(token, &key, &validation)
            .map_err(|e| JwksError::InvalidToken(e.to_string()))?;
        Ok(())
    }

    async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
        let fresh = {
            let set = self.key_set.read().await;
            set.fetched_at.is_some_and(|t| t.elapsed() <= self.cache_ttl)
        };

        if fresh && let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        // Stale, empty, or an unknown kid (the issuer may have rotated keys).
        match self.refresh().await {
            Ok(()) => self.cached(kid).await.ok_or_else(|| match kid {
                Some(k) => JwksError::KeyNotFound(k.to_string()),
                None => JwksError::NoValidKeys,
            }),
            Err(e) => {
                let stale_ok = {
                    let set = self.key_set.read().await;
                    set.fetched_at
                        .is_some_and(|t| t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS))
                };
                if stale_ok && let Some(key) = self.cached(kid).await {
                    warn!("JWKS fetch failed, using stale keys: {}", e);
                    return Ok(key);
                }
                Err(e)
            }
        }
    }

    async fn cached(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let set = self.key_set.read().await;
        match kid {
            Some(k) => set.keys.get(k).cloned(),
            None => set.keys.values().next().cloned(),
        }
    }

    async fn refresh(&self) -> Result<(), JwksError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        let keys = decoding_keys(&document);
        if keys.is_empty() {
            return Err(JwksError::NoValidKeys);
        }

        let mut set = self.key_set.write().await;
        set.keys = keys;
        set.fetched_at = Some(Instant::now());
        debug!("Cached {} JWKS keys", set.keys.len());
        Ok(())
    }
}

/// RSA signing keys from a JWKS document, keyed by `kid`.
fn decoding_keys(document: &JwksDocument) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();
    for jwk in &document.keys {
        if jwk.kty != "RSA" || jwk.key_use.as_deref() == Some("enc") {
            continue;
        }
        let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
            warn!(kid = ?jwk.kid, "Skipping RSA key without n/e components");
            continue;
        };
        match DecodingKey::from_rsa_components(n, e) {
            Ok(key) => {
                let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                keys.insert(kid, key);
            }
            Err(err) => warn!(kid = ?jwk.kid, "Invalid RSA key components: {}", err),
        }
    }
    keys
}

/// JWKS verification failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwksError {
    Fetch(String),
    Parse(String),
    NoValidKeys,
    KeyNotFound(String),
    InvalidToken(String),
}

impl fmt::Display for JwksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::InvalidToken(msg) => write!(f, "Token failed verification: {}", msg),
        }
    }
}

impl std::error::Error for JwksError {}
