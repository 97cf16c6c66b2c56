//! In-process [`DeviceAuthorizer`] for tests.
//!
//! Polls block on a semaphore so tests decide when (and whether) a
//! handshake completes.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::auth::{DeviceAuthorizer, DeviceChallenge, DeviceFlowError, TokenRecord};
use crate::auth::device_flow::DeviceFlowFuture;
use crate::session::Authenticator;
use crate::types::{DeviceCode, SessionId, UserCode};

pub(crate) struct FakeAuthorizer {
    pub initiate_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub cancelled_polls: Arc<AtomicUsize>,
    /// Lifetime argument of the most recent poll.
    pub last_poll_lifetime: AtomicU64,
    challenge_age_seconds: AtomicI64,
    panic_next_poll: AtomicBool,
    initiate_error: Mutex<Option<DeviceFlowError>>,
    outcomes: Mutex<VecDeque<Result<TokenRecord, DeviceFlowError>>>,
    device_outcomes: Mutex<HashMap<String, Result<TokenRecord, DeviceFlowError>>>,
    gate: Semaphore,
}

impl FakeAuthorizer {
    /// Polls wait for [`FakeAuthorizer::release`].
    pub fn gated() -> Self {
        Self {
            initiate_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            cancelled_polls: Arc::new(AtomicUsize::new(0)),
            last_poll_lifetime: AtomicU64::new(0),
            challenge_age_seconds: AtomicI64::new(0),
            panic_next_poll: AtomicBool::new(false),
            initiate_error: Mutex::new(None),
            outcomes: Mutex::new(VecDeque::new()),
            device_outcomes: Mutex::new(HashMap::new()),
            gate: Semaphore::new(0),
        }
    }

    /// Polls complete as soon as an outcome is queued.
    pub fn immediate() -> Self {
        let fake = Self::gated();
        fake.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        fake
    }

    pub fn push_token(&self, access_token: impl Into<String>, scopes: &[&str]) {
        let scopes: BTreeSet<String> = scopes.iter().map(|s| s.to_string()).collect();
        self.push_outcome(Ok(TokenRecord::new(access_token, None, 3600, scopes)));
    }

    pub fn push_outcome(&self, outcome: Result<TokenRecord, DeviceFlowError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Outcome for the `n`th handshake (1-based), whatever order polls finish in.
    pub fn push_token_for_attempt(
        &self,
        n: usize,
        access_token: impl Into<String>,
        scopes: &[&str],
    ) {
        let scopes: BTreeSet<String> = scopes.iter().map(|s| s.to_string()).collect();
        self.device_outcomes.lock().unwrap().insert(
            format!("device-{}", n),
            Ok(TokenRecord::new(access_token, None, 3600, scopes)),
        );
    }

    pub fn fail_initiate(&self, error: DeviceFlowError) {
        *self.initiate_error.lock().unwrap() = Some(error);
    }

    /// Issue challenges that are already `seconds` old.
    pub fn backdate_challenges(&self, seconds: i64) {
        self.challenge_age_seconds.store(seconds, Ordering::SeqCst);
    }

    /// Make the next poll panic instead of returning.
    pub fn panic_next_poll(&self) {
        self.panic_next_poll.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, polls: usize) {
        self.gate.add_permits(polls);
    }

    pub fn initiate_count(&self) -> usize {
        self.initiate_calls.load(Ordering::SeqCst)
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled_polls.load(Ordering::SeqCst)
    }
}

/// Counts polls dropped before producing an outcome.
struct PollGuard {
    cancelled: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl DeviceAuthorizer for FakeAuthorizer {
    fn initiate(&self) -> DeviceFlowFuture<'_, DeviceChallenge> {
        Box::pin(async move {
            let n = self.initiate_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.initiate_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(DeviceChallenge {
                verification_uri: "https://auth.example.com/device".to_string(),
                verification_uri_complete: None,
                user_code: UserCode::new(format!("CODE-{}", n)),
                device_code: DeviceCode::new(format!("device-{}", n)),
                interval_seconds: 0,
                expires_in_seconds: 600,
                issued_at: Utc::now()
                    - chrono::Duration::seconds(self.challenge_age_seconds.load(Ordering::SeqCst)),
            })
        })
    }

    fn poll_for_token<'a>(
        &'a self,
        device_code: &'a DeviceCode,
        _interval_seconds: u64,
        expires_in_seconds: u64,
    ) -> DeviceFlowFuture<'a, TokenRecord> {
        Box::pin(async move {
            self.last_poll_lifetime
                .store(expires_in_seconds, Ordering::SeqCst);
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_next_poll.swap(false, Ordering::SeqCst) {
                panic!("token endpoint sent an unusable response");
            }
            let mut guard = PollGuard {
                cancelled: self.cancelled_polls.clone(),
                armed: true,
            };
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| DeviceFlowError::AuthServer(e.to_string()))?;
            permit.forget();
            guard.armed = false;
            if let Some(outcome) = self
                .device_outcomes
                .lock()
                .unwrap()
                .remove(device_code.as_str())
            {
                return outcome;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(DeviceFlowError::Timeout))
        })
    }
}

/// Wait for the session's background handshake to settle.
pub(crate) async fn wait_for_login(auth: &Authenticator, session: &SessionId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while auth.is_pending(session) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("login did not settle");
}
