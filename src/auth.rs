//! Token verification for WebSocket sessions.
//!
//! The user id travels in the JWT `iss` claim as a decimal string, matching the tokens
//! issued by the login endpoints.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::connection::UserId;

/// WebSocket close codes sent when a session fails authentication.
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("token subject {0:?} is not a user id")]
    BadSubject(String),
}

impl AuthError {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::Expired => CLOSE_TOKEN_EXPIRED,
            _ => CLOSE_TOKEN_INVALID,
        }
    }

    pub fn close_reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Token missing",
            AuthError::Expired => "Token expired",
            AuthError::Invalid(_) | AuthError::BadSubject(_) => "Token invalid",
        }
    }
}

/// Turns a bearer token into the user id it was issued for. Any error means the
/// connection must be refused.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    iss: String,
    exp: i64,
}

/// HS256 verifier (and issuer) over a shared secret.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issue a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: UserId, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            iss: user_id.to_string(),
            exp: Utc::now().timestamp() + ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            if matches!(e.kind(), ErrorKind::ExpiredSignature) {
                AuthError::Expired
            } else {
                AuthError::Invalid(e)
            }
        })?;
        data.claims
            .iss
            .trim()
            .parse()
            .map_err(|_| AuthError::BadSubject(data.claims.iss))
    }
}
