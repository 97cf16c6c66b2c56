//! User identity extraction from access tokens.
//!
//! Pure: no signature check and no fallback. The caller decides what to do
//! when extraction fails (see `session::Authenticator`).

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};

use crate::types::UserId;

/// Claims checked for a user identifier, highest priority first.
pub const USER_ID_CLAIMS: [&str; 3] = ["sub", "user_id", "uid"];

/// Why a token could not yield a user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The token does not have exactly three dot-separated segments.
    MalformedStructure(usize),
    /// The payload segment is not valid base64url.
    InvalidEncoding(String),
    /// The payload is not a JSON object.
    InvalidPayload(String),
    /// None of `sub`, `user_id`, `uid` is present.
    MissingUserClaim,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedStructure(n) => {
                write!(f, "Token has {} segments, expected 3", n)
            }
            Self::InvalidEncoding(msg) => write!(f, "Token payload is not base64url: {}", msg),
            Self::InvalidPayload(msg) => write!(f, "Token payload is not a JSON object: {}", msg),
            Self::MissingUserClaim => write!(f, "Token has no sub, user_id or uid claim"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Extract the user id from a JWT-shaped access token.
pub fn extract_user_id(token: &str) -> Result<UserId, DecodeError> {
    let claims = decode_claims(token)?;

    USER_ID_CLAIMS
        .iter()
        .find_map(|claim| claims.get(*claim).and_then(claim_as_string))
        .map(UserId::new)
        .ok_or(DecodeError::MissingUserClaim)
}

/// Decode the payload segment of a JWT-shaped token without verifying it.
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::MalformedStructure(segments.len()));
    }

    // Some issuers pad the payload even though RFC 7515 says not to.
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecodeError::InvalidPayload(format!(
            "found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DecodeError::InvalidPayload(e.to_string())),
    }
}

/// Drupal emits `uid` as a number; accept strings and numbers alike.
fn claim_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
