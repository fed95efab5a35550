use std::fmt::{self, Debug, Formatter};

use chrono::Utc;
use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use tennis_tournament_api::auth::Claims;
use tennis_tournament_api::{PlayerId, Role};
use thiserror::Error;

/// Auth token expiration time.
const AUTH_TOKEN_EXP: u64 = 60 * 60;

/// Encodes and validates the auth tokens issued by the identity provider.
///
/// Only the HMAC algorithms (`HS256`, `HS384`, `HS512`) are supported since the key is a
/// shared secret.
#[derive(Clone)]
pub struct Authorization {
    header: Header,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authorization {
    /// Creates a new `Authorization` instance which uses given [`Algorithm`].
    pub fn new(alg: Algorithm, secret: &[u8]) -> Self {
        let mut validation = Validation::new(alg);
        // `exp` and `nbf` are checked in `validate_auth_token`.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            header: Header::new(alg),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Creates a new auth token for `sub`, valid from now on for [`AUTH_TOKEN_EXP`] seconds.
    pub fn create_token(&self, sub: PlayerId, role: Role) -> Result<String, AuthError> {
        let now = Utc::now().timestamp() as u64;

        let mut claims = Claims::new(sub, role);
        claims.iat = now;
        claims.nbf = now;
        claims.exp = now + AUTH_TOKEN_EXP;

        self.encode_token(&claims)
    }

    /// Encodes the [`Claims`] as they are.
    pub fn encode_token(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(jsonwebtoken::encode(&self.header, claims, &self.encoding_key)?)
    }

    /// Decodes a token and checks its signature.
    pub fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// Decodes and validates an auth token, including all time claims.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the token is malformed, has an invalid signature, is expired
    /// or not yet valid.
    pub fn validate_auth_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode_token(token)?;

        let now = Utc::now().timestamp() as u64;

        for claim in [claims.iat, claims.nbf, claims.exp] {
            if claim == 0 {
                return Err(AuthError::InvalidToken);
            }
        }

        if claims.exp < now || claims.nbf > now {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Authenticates a request from its `Authorization: Bearer <token>` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredential)?;

        let token = header
            .to_str()
            .ok()
            .and_then(|header| header.strip_prefix("Bearer "))
            .ok_or(AuthError::InvalidToken)?;

        self.validate_auth_token(token.trim())
    }
}

impl Debug for Authorization {
    #[inline]
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Authorization {{ encoding_key, decoding_key }}")
    }
}

/// Fails unless the authenticated caller is an admin.
pub fn require_admin(claims: &Claims) -> Result<(), AuthError> {
    if claims.role.is_admin() {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole(claims.role))
    }
}

/// Compares the secret presented by the scheduler with the configured one. An empty configured
/// secret rejects everything.
pub fn verify_secret(expected: &str, given: Option<&str>) -> Result<(), AuthError> {
    let given = given.ok_or(AuthError::MissingCredential)?;

    if expected.is_empty() {
        log::warn!("Rejecting scheduler call: no cron secret configured");
        return Err(AuthError::InvalidSecret);
    }

    if Sha256::digest(expected.as_bytes()) == Sha256::digest(given.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidSecret)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredential,
    #[error("invalid auth token")]
    InvalidToken,
    #[error("invalid auth token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("role {0} is not allowed to do this")]
    InsufficientRole(Role),
    #[error("invalid secret")]
    InvalidSecret,
}

impl AuthError {
    /// Returns `true` if the caller was identified but lacks permissions.
    #[inline]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::InsufficientRole(_))
    }
}
