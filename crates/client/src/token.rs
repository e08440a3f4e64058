//! Access-token claims decode.
//!
//! The access token is a signed JWT; the client reads its claims without
//! verifying the signature (the server is the verifier). Only the embedded
//! expiry and identity claims are consumed here.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("access token is not decodable: {0}")]
    Undecodable(#[from] jsonwebtoken::errors::Error),
}

/// Claims the client reads out of an access token.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub exp: i64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
}

impl AccessClaims {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// A token is valid strictly before its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Decode claims without signature verification.
///
/// Expiry is not validated here either; callers check it against their own
/// clock so that an expired-but-well-formed token still yields its claims.
pub fn decode_access_claims(token: &str) -> Result<AccessClaims, ClaimsError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Whether the access token should be treated as expired right now.
///
/// An undecodable token counts as expired: it cannot prove anything, so the
/// pipeline forces a refresh.
#[must_use]
pub fn access_token_expired(token: &str, now: DateTime<Utc>) -> bool {
    match decode_access_claims(token) {
        Ok(claims) => claims.is_expired_at(now),
        Err(_) => true,
    }
}
