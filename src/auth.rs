//! Bearer-token resolution and app token issuance.
//!
//! Tokens are HMAC-signed JWTs carrying a `uid` claim. With `app_debug` on,
//! a token that fails verification is accepted verbatim as the uid
//! (`Principal::DevRaw`), which lets local clients skip login.

use std::str::FromStr;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("invalid Authorization header format")]
    MalformedHeader,
    #[error("invalid token")]
    InvalidToken,
    #[error("unsupported JWT algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Who a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Signature checked, uid taken from the claim.
    Verified(String),
    /// Debug mode only: the raw token is the uid.
    DevRaw(String),
}

impl Principal {
    pub fn uid(&self) -> &str {
        match self {
            Principal::Verified(uid) | Principal::DevRaw(uid) => uid,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(default)]
    uid: Option<String>,
}

pub struct TokenAuthority {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    allow_raw_tokens: bool,
}

impl TokenAuthority {
    pub fn new(secret: &str, algorithm: &str, allow_raw_tokens: bool) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| AuthError::UnsupportedAlgorithm(algorithm.to_string()))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }

        let mut validation = Validation::new(algorithm);
        // App tokens carry no expiry; `exp` is still checked when present.
        validation.required_spec_claims.clear();

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            allow_raw_tokens,
        })
    }

    /// Sign an app token for `uid`.
    pub fn issue(&self, uid: &str) -> Result<String, AuthError> {
        let claims = Claims {
            uid: Some(uid.to_string()),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Resolve an `Authorization` header value to a principal.
    pub fn resolve_bearer(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let (scheme, token) = header.split_once(' ').ok_or(AuthError::MalformedHeader)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::MalformedHeader);
        }

        match self.verify(token) {
            Some(uid) => Ok(Principal::Verified(uid)),
            None if self.allow_raw_tokens && !token.is_empty() => {
                debug!("accepting raw bearer token in debug mode");
                Ok(Principal::DevRaw(token.to_string()))
            }
            None => Err(AuthError::InvalidToken),
        }
    }

    fn verify(&self, token: &str) -> Option<String> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).ok()?;
        data.claims.uid.filter(|uid| !uid.is_empty())
    }
}
