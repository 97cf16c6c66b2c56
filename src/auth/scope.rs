//! Per-tool scope enforcement.
//!
//! Tools declare an auth level and required scopes in
//! `annotations.auth`. Access requires the session's token scopes to be a
//! superset of the required ones; scopes are compared as exact strings.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How much authentication a tool needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// No token needed; none is forwarded.
    None,
    /// Token forwarded when present; the tool degrades without one.
    Optional,
    /// Token with all required scopes needed.
    Required,
}

impl AuthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Required => "required",
        }
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `annotations.auth` of a discovered tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAuthMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<AuthLevel>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ToolAuthMetadata {
    pub fn required_scopes(&self) -> BTreeSet<String> {
        self.scopes.iter().cloned().collect()
    }
}

/// Effective auth level: explicit level wins, otherwise `required` when any
/// scope is listed, otherwise `none`.
pub fn auth_level_of(metadata: Option<&ToolAuthMetadata>) -> AuthLevel {
    match metadata {
        None => AuthLevel::None,
        Some(meta) => match meta.level {
            Some(level) => level,
            None if !meta.scopes.is_empty() => AuthLevel::Required,
            None => AuthLevel::None,
        },
    }
}

/// Authorization failure. Never carries token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No token resolves for the session.
    Unauthenticated,
    /// A token resolved but lacks scopes.
    AccessDenied {
        required: BTreeSet<String>,
        missing: BTreeSet<String>,
        current: BTreeSet<String>,
    },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => {
                write!(f, "Authentication required. Call auth_login to sign in.")
            }
            Self::AccessDenied { missing, .. } => write!(
                f,
                "Access denied: missing scopes [{}]",
                missing.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

impl std::error::Error for AccessError {}

/// Decide whether a call may proceed.
///
/// `token_scopes` is `None` when no token resolves for the session.
pub fn check_access(
    metadata: Option<&ToolAuthMetadata>,
    token_scopes: Option<&BTreeSet<String>>,
) -> Result<(), AccessError> {
    match auth_level_of(metadata) {
        AuthLevel::None | AuthLevel::Optional => Ok(()),
        AuthLevel::Required => {
            let current = token_scopes.ok_or(AccessError::Unauthenticated)?;
            let required = metadata.map(|m| m.required_scopes()).unwrap_or_default();
            let missing: BTreeSet<String> = required.difference(current).cloned().collect();

            if missing.is_empty() {
                Ok(())
            } else {
                Err(AccessError::AccessDenied {
                    required,
                    missing,
                    current: current.clone(),
                })
            }
        }
    }
}
