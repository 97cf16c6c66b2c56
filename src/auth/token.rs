//! OAuth grant results.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// A single OAuth grant result.
///
/// Immutable once created. A reconnecting session reuses the record stored
/// for its user instead of replacing it.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_in_seconds: u64,
    scopes: BTreeSet<String>,
    issued_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Create a token record issued now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_seconds: u64,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in_seconds,
            scopes,
            issued_at: Utc::now(),
        }
    }

    /// The bearer credential attached to outbound requests.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in_seconds(&self) -> u64 {
        self.expires_in_seconds
    }

    /// Granted scopes, deduplicated.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Absolute expiry derived from the grant lifetime.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let lifetime = i64::try_from(self.expires_in_seconds).unwrap_or(i64::MAX);
        Duration::try_seconds(lifetime)
            .and_then(|d| self.issued_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Short hash of the access token, safe to put in logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.access_token)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &format_args!("<{}>", self.fingerprint()))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("scopes", &self.scopes)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Token endpoint success body (RFC 6749 section 5.1).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Convert into a record. A missing `scope` falls back to the scopes
    /// that were requested, as RFC 6749 allows.
    pub fn into_record(self, requested_scopes: &[String]) -> TokenRecord {
        let scopes = match self.scope.as_deref() {
            Some(scope) => parse_scopes(scope),
            None => requested_scopes.iter().cloned().collect(),
        };
        TokenRecord::new(
            self.access_token,
            self.refresh_token,
            self.expires_in.unwrap_or(0),
            scopes,
        )
    }
}

/// Parse a space-delimited scope string into a set.
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// First 12 hex characters of the SHA-256 of `token`.
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}
