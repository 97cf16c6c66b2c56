//! Session and identity maps.
//!
//! Two independent maps, both in memory:
//!
//! - session -> user: one entry per live authenticated transport session
//! - user -> token: one entry per authenticated principal, outliving any
//!   number of reconnects
//!
//! Closing a transport session only drops the first mapping. Only an
//! explicit logout drops the second.

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::TokenRecord;
use crate::types::{SessionId, UserId};

/// Aggregate counts. Safe to expose; carries no identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active_sessions: usize,
    pub active_users: usize,
}

/// Owner of the session -> user and user -> token maps.
///
/// Construct once per process and share by `Arc`.
#[derive(Default)]
pub struct SessionStore {
    session_users: DashMap<SessionId, UserId>,
    user_tokens: DashMap<UserId, TokenRecord>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_user_for_session(&self, session_id: &SessionId) -> Option<UserId> {
        self.session_users.get(session_id).map(|u| u.value().clone())
    }

    pub fn get_token_for_user(&self, user_id: &UserId) -> Option<TokenRecord> {
        self.user_tokens.get(user_id).map(|t| t.value().clone())
    }

    /// Session -> user -> token. Logs which link is missing.
    pub fn resolve_token(&self, session_id: &SessionId) -> Option<TokenRecord> {
        let Some(user_id) = self.get_user_for_session(session_id) else {
            debug!(session_id = %session_id, "No user bound to session");
            return None;
        };

        let token = self.get_token_for_user(&user_id);
        if token.is_none() {
            debug!(
                session_id = %session_id,
                user_id = %user_id,
                "Session is bound but user has no stored token"
            );
        }
        token
    }

    /// Bind a session to a user, replacing any previous binding.
    pub fn bind_session_to_user(&self, session_id: &SessionId, user_id: &UserId) {
        if let Some(previous) = self
            .session_users
            .insert(session_id.clone(), user_id.clone())
            && previous != *user_id
        {
            info!(
                session_id = %session_id,
                previous_user = %previous,
                user_id = %user_id,
                "Session rebound to a different user"
            );
        }
    }

    /// Create or overwrite the user's token.
    pub fn store_user_token(&self, user_id: &UserId, token: TokenRecord) {
        debug!(
            user_id = %user_id,
            token = %token.fingerprint(),
            "Storing user token"
        );
        self.user_tokens.insert(user_id.clone(), token);
    }

    /// Transport teardown: forget the session, keep the user's token.
    pub fn on_session_closed(&self, session_id: &SessionId) {
        if let Some((_, user_id)) = self.session_users.remove(session_id) {
            debug!(
                session_id = %session_id,
                user_id = %user_id,
                "Session closed; user token retained"
            );
        }
    }

    /// Explicit logout: forget the session and the user's token.
    ///
    /// Returns the user that was logged out, or `None` for an anonymous
    /// session (a harmless no-op).
    pub fn logout(&self, session_id: &SessionId) -> Option<UserId> {
        let (_, user_id) = self.session_users.remove(session_id)?;
        self.user_tokens.remove(&user_id);
        info!(session_id = %session_id, user_id = %user_id, "User logged out");
        Some(user_id)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.session_users.len(),
            active_users: self.user_tokens.len(),
        }
    }

    /// Current session -> user bindings, for the gated debug endpoint.
    pub fn session_bindings(&self) -> Vec<(SessionId, UserId)> {
        let mut bindings: Vec<_> = self
            .session_users
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn token(value: &str) -> TokenRecord {
        TokenRecord::new(value, None, 3600, BTreeSet::from(["a".to_string()]))
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn test_resolve_token_composes_both_maps() {
        let store = SessionStore::new();
        assert!(store.resolve_token(&sid("s1")).is_none());

        store.bind_session_to_user(&sid("s1"), &uid("u1"));
        assert!(store.resolve_token(&sid("s1")).is_none());

        store.store_user_token(&uid("u1"), token("t1"));
        assert_eq!(store.resolve_token(&sid("s1")).unwrap().access_token(), "t1");
    }

    #[test]
    fn test_close_keeps_token() {
        let store = SessionStore::new();
        store.store_user_token(&uid("u1"), token("t1"));
        store.bind_session_to_user(&sid("s1"), &uid("u1"));

        store.on_session_closed(&sid("s1"));

        assert!(store.get_user_for_session(&sid("s1")).is_none());
        assert_eq!(store.get_token_for_user(&uid("u1")).unwrap().access_token(), "t1");
        assert_eq!(
            store.stats(),
            SessionStats {
                active_sessions: 0,
                active_users: 1
            }
        );
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = SessionStore::new();
        store.on_session_closed(&sid("never-bound"));
        store.bind_session_to_user(&sid("s1"), &uid("u1"));
        store.on_session_closed(&sid("s1"));
        store.on_session_closed(&sid("s1"));
        assert_eq!(store.stats().active_sessions, 0);
    }

    #[test]
    fn test_logout_removes_token_and_binding() {
        let store = SessionStore::new();
        store.store_user_token(&uid("u1"), token("t1"));
        store.bind_session_to_user(&sid("s1"), &uid("u1"));

        assert_eq!(store.logout(&sid("s1")), Some(uid("u1")));
        assert!(store.get_token_for_user(&uid("u1")).is_none());
        assert!(store.get_user_for_session(&sid("s1")).is_none());
    }

    #[test]
    fn test_logout_anonymous_is_noop() {
        let store = SessionStore::new();
        store.store_user_token(&uid("u1"), token("t1"));
        assert_eq!(store.logout(&sid("anon")), None);
        assert_eq!(store.stats().active_users, 1);
    }

    #[test]
    fn test_logout_leaves_other_users_alone() {
        let store = SessionStore::new();
        store.store_user_token(&uid("u1"), token("t1"));
        store.store_user_token(&uid("u2"), token("t2"));
        store.bind_session_to_user(&sid("s1"), &uid("u1"));
        store.bind_session_to_user(&sid("s2"), &uid("u2"));

        store.logout(&sid("s1"));

        assert_eq!(store.resolve_token(&sid("s2")).unwrap().access_token(), "t2");
    }

    #[test]
    fn test_many_sessions_one_user() {
        let store = SessionStore::new();
        store.store_user_token(&uid("u1"), token("t1"));
        for s in ["s1", "s2", "s3"] {
            store.bind_session_to_user(&sid(s), &uid("u1"));
        }
        assert_eq!(
            store.stats(),
            SessionStats {
                active_sessions: 3,
                active_users: 1
            }
        );
    }

    #[test]
    fn test_bind_overwrites() {
        let store = SessionStore::new();
        store.bind_session_to_user(&sid("s1"), &uid("u1"));
        store.bind_session_to_user(&sid("s1"), &uid("u2"));
        assert_eq!(store.get_user_for_session(&sid("s1")), Some(uid("u2")));
        assert_eq!(store.stats().active_sessions, 1);
    }

    #[test]
    fn test_session_bindings_sorted() {
        let store = SessionStore::new();
        store.bind_session_to_user(&sid("b"), &uid("u2"));
        store.bind_session_to_user(&sid("a"), &uid("u1"));
        let bindings = store.session_bindings();
        assert_eq!(bindings[0], (sid("a"), uid("u1")));
        assert_eq!(bindings[1], (sid("b"), uid("u2")));
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = SessionStats {
            active_sessions: 2,
            active_users: 1,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["activeSessions"], 2);
        assert_eq!(json["activeUsers"], 1);
    }
}
