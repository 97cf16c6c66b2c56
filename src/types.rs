//! NewType wrappers for the identifiers that flow through the bridge.
//!
//! Session ids and user ids are both plain strings on the wire; keeping them
//! as distinct types makes it impossible to key the user-token map by a
//! session id by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Opaque identifier assigned to one physical client connection.
    ///
    /// Ephemeral: a reconnecting client gets a new one.
    SessionId
);

newtype_string!(
    /// Stable identifier of an authenticated principal.
    ///
    /// Normally taken from the `sub`, `user_id` or `uid` claim of the access
    /// token. In degraded mode it is the session id of the login attempt.
    UserId
);

newtype_string!(
    /// Tool name as published by the Drupal discovery endpoint.
    ToolName
);

newtype_string!(
    /// Device code from a device authorization response.
    ///
    /// Secret between the bridge and the authorization server; never shown
    /// to the user.
    DeviceCode
);

newtype_string!(
    /// Short code the user types at the verification URI.
    UserCode
);

impl From<&SessionId> for UserId {
    /// Degraded-mode identity: the user is indistinguishable from the session.
    fn from(session: &SessionId) -> Self {
        Self(session.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_creation() {
        let id = SessionId::new("a1b2c3");
        assert_eq!(id.as_str(), "a1b2c3");
        assert_eq!(id.to_string(), "a1b2c3");
    }

    #[test]
    fn test_user_id_from_string() {
        let id: UserId = "42".into();
        assert_eq!(id.as_str(), "42");

        let id: UserId = String::from("user-7").into();
        assert_eq!(id.into_inner(), "user-7");
    }

    #[test]
    fn test_user_id_from_session_fallback() {
        let session = SessionId::new("sess-9");
        let user = UserId::from(&session);
        assert_eq!(user.as_str(), "sess-9");
    }

    #[test]
    fn test_serde_transparent() {
        let name = ToolName::new("node.create");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"node.create\"");

        let parsed: ToolName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_borrow_lookup_in_map() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(UserId::new("u1"), 1);
        assert_eq!(map.get("u1"), Some(&1));
        assert!(map.get("u2").is_none());
    }

    #[test]
    fn test_device_and_user_code() {
        let device = DeviceCode::new("dev-123");
        let user = UserCode::new("ABCD-EFGH");
        assert_eq!(device.as_str(), "dev-123");
        assert_eq!(user.as_ref(), "ABCD-EFGH");
    }
}
