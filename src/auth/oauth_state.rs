//! OAuth state capsule
//!
//! The state parameter carries everything the callback needs (user,
//! profile, nonce, platform extras such as a PKCE verifier) as an
//! AES-GCM sealed, base64url blob. No server-side session is kept; the
//! nonce is only recorded once consumed (see `Database::consume_oauth_nonce`).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::vault::{VaultKey, open, seal};
use crate::error::AppError;

const NONCE_BYTES: usize = 16;
const CORE_KEYS: [&str; 4] = ["user_id", "profile_id", "nonce", "issued_at"];

/// Decoded OAuth state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub user_id: String,
    pub profile_id: String,
    pub nonce: String,
    /// Unix seconds
    pub issued_at: i64,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl OAuthState {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match DateTime::<Utc>::from_timestamp(self.issued_at, 0) {
            Some(issued_at) => issued_at + ttl <= now || issued_at > now + Duration::minutes(1),
            None => true,
        }
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

/// Why a state could not be decoded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Tampered, foreign, or incomplete state
    #[error("invalid state: {0}")]
    BadRequest(String),

    /// Authentic capsule whose content is not a state object
    #[error("unparseable state: {0}")]
    ParseError(String),
}

impl StateError {
    /// Error code appended to the post-callback redirect
    pub fn redirect_code(&self) -> &'static str {
        match self {
            StateError::BadRequest(_) => "invalid_state",
            StateError::ParseError(_) => "state_parse_error",
        }
    }
}

/// Generate a random nonce
pub fn generate_nonce() -> String {
    let mut bytes = [0_u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Seal a new state capsule
pub fn encode(
    user_id: &str,
    profile_id: &str,
    extra: BTreeMap<String, String>,
    key: &VaultKey,
) -> Result<String, AppError> {
    let state = OAuthState {
        user_id: user_id.to_string(),
        profile_id: profile_id.to_string(),
        nonce: generate_nonce(),
        issued_at: Utc::now().timestamp(),
        extra,
    };

    let payload =
        serde_json::to_vec(&state).map_err(|e| AppError::EncryptionFailed(e.to_string()))?;
    let sealed = seal(&payload, key)?;
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Open and validate a state capsule
///
/// # Arguments
/// * `required_extra` - Extras the platform's callback depends on
///
/// # Errors
/// * `BadRequest` - not base64, fails authentication, or misses a key
/// * `ParseError` - authentic but not a JSON state object
pub fn decode(
    state: &str,
    required_extra: &[&str],
    key: &VaultKey,
) -> Result<OAuthState, StateError> {
    let sealed = URL_SAFE_NO_PAD
        .decode(state.trim())
        .map_err(|_| StateError::BadRequest("state is not base64url".to_string()))?;
    let payload = open(&sealed, key)
        .map_err(|_| StateError::BadRequest("state failed authentication".to_string()))?;

    let value: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| StateError::ParseError(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| StateError::ParseError("state is not an object".to_string()))?;

    for field in CORE_KEYS {
        let present = match object.get(field) {
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Number(_)) => true,
            _ => false,
        };
        if !present {
            return Err(StateError::BadRequest(format!("state is missing '{}'", field)));
        }
    }

    let extra = object.get("extra").and_then(|v| v.as_object());
    for field in required_extra {
        let present = extra
            .and_then(|extra| extra.get(*field))
            .and_then(|v| v.as_str())
            .is_some_and(|v| !v.is_empty());
        if !present {
            return Err(StateError::BadRequest(format!("state is missing '{}'", field)));
        }
    }

    serde_json::from_value(value).map_err(|e| StateError::ParseError(e.to_string()))
}
