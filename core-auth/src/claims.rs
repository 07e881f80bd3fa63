//! Access Token Claims
//!
//! Reads the `exp` and `sid` claims from a JWT-style `header.payload.signature`
//! token. The signature is not verified: the claims only drive local
//! scheduling and are never trusted as proof of anything.

use crate::error::{AuthError, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Claims the client cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    /// Session id embedded by the server, when present
    pub session_id: Option<String>,
    pub subject: Option<String>,
}

#[derive(Deserialize)]
struct RawClaims {
    exp: Option<i64>,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

/// Decode the payload segment of `token`.
///
/// Fails with [`AuthError::MalformedToken`] when the token does not have three
/// segments, the payload is not base64url JSON, or `exp` is missing.
///
/// # Examples
///
/// ```
/// use core_auth::claims::decode_claims;
///
/// // {"exp":1700000000,"sid":"s1"}
/// let token = "e30.eyJleHAiOjE3MDAwMDAwMDAsInNpZCI6InMxIn0.sig";
/// let claims = decode_claims(token).unwrap();
/// assert_eq!(claims.expires_at.timestamp(), 1_700_000_000);
/// assert_eq!(claims.session_id.as_deref(), Some("s1"));
/// ```
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ));
    };

    // Some issuers keep the padding
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;

    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))?;

    let exp = raw
        .exp
        .ok_or_else(|| AuthError::MalformedToken("missing exp claim".to_string()))?;
    let expires_at = Utc
        .timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| AuthError::MalformedToken(format!("exp out of range: {exp}")))?;

    Ok(TokenClaims {
        expires_at,
        session_id: raw.sid.filter(|sid| !sid.is_empty()),
        subject: raw.sub,
    })
}

/// Build an unsigned token carrying `claims`. Used by tests and fakes.
#[doc(hidden)]
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.unsigned")
}
