//! Device-flow login orchestration per transport session.
//!
//! `login` starts a handshake and returns the challenge immediately; the
//! token poll runs in a background task owned by the session's attempt
//! state. When the poll finishes, the task re-checks (under the attempt
//! entry lock) that its attempt is still the current one before it binds
//! anything, so a closed or logged-out session never receives a late bind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    DeviceAuthorizer, DeviceChallenge, DeviceFlowError, JwksVerifier, TokenRecord,
    extract_user_id,
};
use crate::session::SessionStore;
use crate::types::{SessionId, UserId};

enum LoginState {
    Pending {
        attempt_id: Uuid,
        challenge: DeviceChallenge,
        task: Option<JoinHandle<()>>,
    },
    Succeeded {
        user_id: UserId,
    },
    Failed {
        reason: String,
    },
}

/// Result of a successful `login` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A new handshake was started.
    Started(DeviceChallenge),
    /// A handshake is already pending; its challenge is returned again.
    InProgress(DeviceChallenge),
}

impl LoginOutcome {
    pub fn challenge(&self) -> &DeviceChallenge {
        match self {
            Self::Started(c) | Self::InProgress(c) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    AlreadyAuthenticated(UserId),
    Flow(DeviceFlowError),
}

impl std::fmt::Display for LoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyAuthenticated(user) => write!(
                f,
                "Session is already authenticated as {}. Call auth_logout to sign out first.",
                user
            ),
            Self::Flow(e) => write!(f, "Login failed: {}", e),
        }
    }
}

impl std::error::Error for LoginError {}

/// What `auth_status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AuthStatus {
    #[serde(rename_all = "camelCase")]
    Authenticated {
        user_id: UserId,
        scopes: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
        /// True when the user id is the session id fallback and the token
        /// will not survive a reconnect.
        degraded: bool,
    },
    Pending {
        challenge: DeviceChallenge,
    },
    Failed {
        reason: String,
    },
    Unauthenticated,
}

/// Login orchestrator.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<SessionStore>,
    authorizer: Arc<dyn DeviceAuthorizer>,
    verifier: Option<Arc<JwksVerifier>>,
    attempts: Arc<DashMap<SessionId, LoginState>>,
    login_gates: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
}

impl Authenticator {
    pub fn new(
        store: Arc<SessionStore>,
        authorizer: Arc<dyn DeviceAuthorizer>,
        verifier: Option<Arc<JwksVerifier>>,
    ) -> Self {
        Self {
            store,
            authorizer,
            verifier,
            attempts: Arc::new(DashMap::new()),
            login_gates: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start (or re-surface) a device-flow handshake for the session.
    pub async fn login(&self, session_id: &SessionId) -> Result<LoginOutcome, LoginError> {
        // Serialize logins per session so concurrent calls share one handshake.
        let gate = self
            .login_gates
            .entry(session_id.clone())
            .or_default()
            .clone();
        let _guard = gate.lock().await;

        if let Some(user_id) = self.store.get_user_for_session(session_id) {
            return Err(LoginError::AlreadyAuthenticated(user_id));
        }

        if let Some(challenge) = self.pending_challenge(session_id) {
            debug!(session_id = %session_id, "Login already pending; returning existing challenge");
            return Ok(LoginOutcome::InProgress(challenge));
        }

        // Stale terminal state from an earlier attempt.
        self.attempts.remove(session_id);

        let challenge = match self.authorizer.initiate().await {
            Ok(challenge) => challenge,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Device authorization request failed");
                self.attempts.insert(
                    session_id.clone(),
                    LoginState::Failed {
                        reason: e.to_string(),
                    },
                );
                return Err(LoginError::Flow(e));
            }
        };

        let attempt_id = Uuid::new_v4();
        self.attempts.insert(
            session_id.clone(),
            LoginState::Pending {
                attempt_id,
                challenge: challenge.clone(),
                task: None,
            },
        );

        let this = self.clone();
        let task_session = session_id.clone();
        let task_challenge = challenge.clone();
        let handle = tokio::spawn(async move {
            let _settle = SettleOnExit {
                attempts: this.attempts.clone(),
                session_id: task_session.clone(),
                attempt_id,
            };
            this.complete(task_session, attempt_id, task_challenge).await;
        });

        // The task may already have finished; only attach to our own attempt.
        if let Some(mut entry) = self.attempts.get_mut(session_id)
            && let LoginState::Pending {
                attempt_id: current,
                task,
                ..
            } = &mut *entry
            && *current == attempt_id
        {
            *task = Some(handle);
        }

        info!(
            session_id = %session_id,
            attempt_id = %attempt_id,
            user_code = %challenge.user_code,
            "Device login started"
        );
        Ok(LoginOutcome::Started(challenge))
    }

    /// Report the session's auth state. Terminal login results are
    /// reported once and then cleared.
    pub fn status(&self, session_id: &SessionId) -> AuthStatus {
        if let Some(challenge) = self.pending_challenge(session_id) {
            return AuthStatus::Pending { challenge };
        }

        let terminal = self
            .attempts
            .remove_if(session_id, |_, state| {
                !matches!(state, LoginState::Pending { .. })
            })
            .map(|(_, state)| state);

        match terminal {
            Some(LoginState::Failed { reason }) => return AuthStatus::Failed { reason },
            Some(LoginState::Succeeded { user_id }) => {
                debug!(session_id = %session_id, user_id = %user_id, "Login result consumed");
            }
            _ => {}
        }

        match self.store.get_user_for_session(session_id) {
            Some(user_id) => self.authenticated(session_id, user_id),
            None => AuthStatus::Unauthenticated,
        }
    }

    pub fn is_pending(&self, session_id: &SessionId) -> bool {
        self.pending_challenge(session_id).is_some()
    }

    /// Drop the session's binding and its user's token, cancelling any
    /// pending handshake.
    pub fn logout(&self, session_id: &SessionId) -> Option<UserId> {
        self.cancel_attempt(session_id);
        self.store.logout(session_id)
    }

    /// Transport teardown. The attempt is cancelled before the binding is
    /// removed so an in-flight completion cannot rebind the session.
    pub fn on_session_closed(&self, session_id: &SessionId) {
        self.cancel_attempt(session_id);
        self.login_gates.remove(session_id);
        self.store.on_session_closed(session_id);
    }

    /// Count of handshakes still waiting on the user.
    pub fn pending_logins(&self) -> usize {
        self.attempts
            .iter()
            .filter(|e| matches!(e.value(), LoginState::Pending { .. }))
            .count()
    }

    fn pending_challenge(&self, session_id: &SessionId) -> Option<DeviceChallenge> {
        match self.attempts.get(session_id).as_deref() {
            Some(LoginState::Pending { challenge, .. }) => Some(challenge.clone()),
            _ => None,
        }
    }

    fn cancel_attempt(&self, session_id: &SessionId) {
        if let Some((_, LoginState::Pending { attempt_id, task, .. })) =
            self.attempts.remove(session_id)
        {
            if let Some(task) = task {
                task.abort();
            }
            debug!(session_id = %session_id, attempt_id = %attempt_id, "Pending login cancelled");
        }
    }

    fn authenticated(&self, session_id: &SessionId, user_id: UserId) -> AuthStatus {
        let token = self.store.get_token_for_user(&user_id);
        let degraded = user_id.as_str() == session_id.as_str();
        AuthStatus::Authenticated {
            scopes: token
                .as_ref()
                .map(|t| t.scopes().iter().cloned().collect())
                .unwrap_or_default(),
            expires_at: token.as_ref().map(TokenRecord::expires_at),
            degraded,
            user_id,
        }
    }

    async fn complete(self, session_id: SessionId, attempt_id: Uuid, challenge: DeviceChallenge) {
        // The lifetime runs from when the challenge was issued.
        let remaining = challenge.remaining_seconds(Utc::now());
        let result = self
            .authorizer
            .poll_for_token(&challenge.device_code, challenge.interval_seconds, remaining)
            .await;

        let result = match result {
            Ok(token) => self.verify(token).await,
            Err(e) => Err(e.to_string()),
        };

        let Some(mut entry) = self.attempts.get_mut(&session_id) else {
            debug!(
                session_id = %session_id,
                attempt_id = %attempt_id,
                "Login attempt gone; discarding result"
            );
            return;
        };
        if !entry.is_pending_attempt(attempt_id) {
            debug!(
                session_id = %session_id,
                attempt_id = %attempt_id,
                "Login attempt superseded; discarding result"
            );
            return;
        }

        match result {
            Ok(token) => {
                let user_id = self.identify(&session_id, &token);
                self.adopt_token(&user_id, token);
                self.store.bind_session_to_user(&session_id, &user_id);
                info!(session_id = %session_id, user_id = %user_id, "Device login completed");
                *entry = LoginState::Succeeded { user_id };
            }
            Err(reason) => {
                warn!(session_id = %session_id, reason = %reason, "Device login failed");
                *entry = LoginState::Failed { reason };
            }
        }
    }

    async fn verify(&self, token: TokenRecord) -> Result<TokenRecord, String> {
        if let Some(verifier) = &self.verifier {
            verifier
                .verify(token.access_token())
                .await
                .map_err(|e| format!("Token verification failed: {}", e))?;
        }
        Ok(token)
    }

    /// User id from the token; the session id when the token is opaque.
    fn identify(&self, session_id: &SessionId, token: &TokenRecord) -> UserId {
        match extract_user_id(token.access_token()) {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "Could not derive user id from token; falling back to session id"
                );
                UserId::from(session_id)
            }
        }
    }

    /// Keep an already stored, unexpired token for this user; otherwise
    /// store the new one.
    fn adopt_token(&self, user_id: &UserId, token: TokenRecord) {
        match self.store.get_token_for_user(user_id) {
            Some(existing) if !existing.is_expired() => {
                info!(
                    user_id = %user_id,
                    token = %existing.fingerprint(),
                    "Reusing stored token for returning user"
                );
            }
            Some(existing) => {
                info!(
                    user_id = %user_id,
                    expired = %existing.fingerprint(),
                    token = %token.fingerprint(),
                    "Stored token expired; replacing it"
                );
                self.store.store_user_token(user_id, token);
            }
            None => self.store.store_user_token(user_id, token),
        }
    }
}

impl LoginState {
    fn is_pending_attempt(&self, id: Uuid) -> bool {
        matches!(self, Self::Pending { attempt_id, .. } if *attempt_id == id)
    }
}

const LOGIN_INTERRUPTED: &str = "Login was interrupted before it completed; call auth_login again";

/// Lives for the duration of a poll task. If the task ends while its
/// attempt is still pending (a panic in the poll), the attempt is marked
/// failed so the session can log in again.
struct SettleOnExit {
    attempts: Arc<DashMap<SessionId, LoginState>>,
    session_id: SessionId,
    attempt_id: Uuid,
}

impl Drop for SettleOnExit {
    fn drop(&mut self) {
        if let Some(mut entry) = self.attempts.get_mut(&self.session_id)
            && entry.is_pending_attempt(self.attempt_id)
        {
            warn!(
                session_id = %self.session_id,
                attempt_id = %self.attempt_id,
                "Login task ended without a result"
            );
            *entry = LoginState::Failed {
                reason: LOGIN_INTERRUPTED.to_string(),
            };
        }
    }
}
