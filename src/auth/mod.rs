//! Authentication building blocks.
//!
//! - **decoder**: user id from token claims (`sub`, `user_id`, `uid`)
//! - **device_flow**: RFC 8628 device authorization grant client
//! - **jwks**: optional RS256 signature check of granted tokens
//! - **scope**: per-tool auth level and required-scope enforcement
//! - **token**: the stored grant result
//!
//! Session state (which connection belongs to which user) lives in
//! `crate::session`, not here.

pub mod decoder;
pub mod device_flow;
pub mod jwks;
pub mod scope;
pub mod token;

pub use decoder::{DecodeError, extract_user_id};
pub use device_flow::{DeviceAuthClient, DeviceAuthorizer, DeviceChallenge, DeviceFlowError};
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksError, JwksVerifier};
pub use scope::{AccessError, AuthLevel, ToolAuthMetadata, auth_level_of, check_access};
pub use token::{TokenRecord, parse_scopes};
