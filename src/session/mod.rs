//! Per-connection identity.
//!
//! [`SessionStore`] holds the session -> user and user -> token maps;
//! [`Authenticator`] drives device-flow logins that populate them.

pub mod login;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use login::{AuthStatus, Authenticator, LoginError, LoginOutcome};
pub use store::{SessionStats, SessionStore};
