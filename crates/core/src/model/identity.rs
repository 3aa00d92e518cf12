use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("token is not a three-segment JWT")]
    MalformedToken,
    #[error("token payload is not valid base64: {0}")]
    InvalidPayload(String),
    #[error("token claims could not be parsed: {0}")]
    InvalidClaims(String),
}

/// Claims read from the bearer token payload.
///
/// Decoding is informational only. The signature is never checked here; the
/// server remains authoritative for access control, and these values are used
/// for display and client-side expiry checks.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    /// Standard JWT expiry (Unix timestamp, seconds).
    exp: Option<i64>,
}

/// The authenticated user as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Derive an identity from a bearer token and the server-issued user id.
    ///
    /// The `sub` claim is used when the caller has no user id of its own
    /// (e.g. rehydrating from a stored token).
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` when the token is not a decodable JWT.
    pub fn from_token(token: &str, user_id: Option<UserId>) -> Result<Self, IdentityError> {
        let claims = decode_claims(token)?;
        let user_id = user_id
            .or_else(|| claims.sub.map(UserId::new))
            .ok_or_else(|| IdentityError::InvalidClaims("missing sub claim".into()))?;

        Ok(Self {
            user_id,
            email: claims.email,
            display_name: claims.display_name,
            expires_at: claims.exp.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)),
        })
    }

    /// True when the embedded expiry has passed, evaluated against `now`.
    ///
    /// A token without an `exp` claim never expires client-side.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn decode_claims(token: &str) -> Result<TokenClaims, IdentityError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(IdentityError::MalformedToken);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| IdentityError::InvalidPayload(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| IdentityError::InvalidClaims(e.to_string()))
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
