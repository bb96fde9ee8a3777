//! Access token decoding.
//!
//! Only the payload segment is read; the signature is the backend's concern.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// base64url engine that accepts payloads with or without `=` padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token does not have three segments")]
    Malformed,

    #[error("Token payload is not valid base64url: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),

    #[error("Token has no expiration claim")]
    MissingExpiry,

    #[error("Token expiration claim is out of range")]
    ExpiryOutOfRange,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Claims read from an access token payload
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub token_type: Option<String>,
}

/// Decode the payload of a `header.payload.signature` token.
///
/// An `exp` of zero is treated as missing.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(TokenError::Malformed),
    };

    let bytes = PAYLOAD_ENGINE.decode(payload)?;
    let raw: RawClaims = serde_json::from_slice(&bytes)?;

    let exp = match raw.exp {
        Some(exp) if exp != 0.0 => exp,
        _ => return Err(TokenError::MissingExpiry),
    };
    let exp_ms = exp * 1000.0;
    if !exp_ms.is_finite() || exp_ms.abs() > i64::MAX as f64 {
        return Err(TokenError::ExpiryOutOfRange);
    }
    let expires_at =
        DateTime::from_timestamp_millis(exp_ms as i64).ok_or(TokenError::ExpiryOutOfRange)?;

    Ok(TokenClaims {
        expires_at,
        user_id: raw.user_id,
        token_type: raw.token_type,
    })
}

/// Expiration instant of an access token
pub fn expiration(token: &str) -> Result<DateTime<Utc>, TokenError> {
    decode_claims(token).map(|claims| claims.expires_at)
}
