//! Signed bearer tokens
//!
//! Tokens are compact HS256 JWTs (`header.payload.signature`) carrying the
//! client identity and the scopes granted at issuance. Expiry is checked
//! without leeway: a token is valid on `[iat, exp)`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::registry::OAuthClient;

/// Decoded, verified token contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Issuer
    pub iss: String,
    /// Subject (always the client id)
    pub sub: String,
    /// Client identifier
    pub client_id: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Issued-at (Unix seconds)
    pub iat: u64,
    /// Expires-at (Unix seconds)
    pub exp: u64,
    /// Unique token id (random 128 bits)
    pub jti: String,
}

impl Claims {
    /// Build claims for `client_id` valid for `ttl` from `now`
    #[must_use]
    pub fn new(issuer: &str, client_id: &str, scopes: Vec<String>, now: u64, ttl: Duration) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: client_id.to_string(),
            client_id: client_id.to_string(),
            scopes,
            iat: now,
            exp: now.saturating_add(ttl.as_secs().max(1)),
            jti: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Token validation failures
#[derive(Debug, Error)]
pub enum TokenError {
    /// `now >= exp`
    #[error("token expired")]
    Expired,
    /// Signature does not verify under the configured secret
    #[error("token signature is invalid")]
    BadSignature,
    /// Issuer claim does not match
    #[error("token issuer is invalid")]
    BadIssuer,
    /// Not a well-formed token
    #[error("token is malformed")]
    Malformed,
    /// Signing failed
    #[error("token encoding failed: {0}")]
    Encode(String),
}

impl TokenError {
    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::BadSignature => "bad_signature",
            Self::BadIssuer => "bad_issuer",
            Self::Malformed => "malformed",
            Self::Encode(_) => "encode",
        }
    }
}

/// Issues and validates signed bearer tokens
pub struct TokenManager {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenManager {
    /// Create a manager signing with `secret`
    #[must_use]
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Expiry is enforced in `validate_at` with an explicit clock and no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            issuer,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Configured issuer
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `client` valid for `ttl`
    pub fn issue(&self, client: &OAuthClient, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(client, ttl, unix_now())
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(
        &self,
        client: &OAuthClient,
        ttl: Duration,
        now: u64,
    ) -> Result<String, TokenError> {
        let claims = Claims::new(&self.issuer, &client.client_id, client.scopes.clone(), now, ttl);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Validate a token against the current time
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, unix_now())
    }

    /// Validate a token as if the current time were `now`
    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidIssuer => TokenError::BadIssuer,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;
        let claims = data.claims;

        if claims.exp <= claims.iat {
            return Err(TokenError::Malformed);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Seconds since the Unix epoch
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
