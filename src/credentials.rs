//! Password hashing and access tokens.
//!
//! The engine only sees the [`CredentialService`] trait. The production
//! implementation hashes with Argon2id (PHC strings, random salt) and issues
//! HS256 JWTs carrying the user id and role.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Role;

#[derive(Debug)]
pub enum CredentialError {
    Hash(String),
    Token(String),
    InvalidToken(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Hash(e) => write!(f, "password hashing failed: {e}"),
            CredentialError::Token(e) => write!(f, "token issuance failed: {e}"),
            CredentialError::InvalidToken(e) => write!(f, "invalid token: {e}"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Identity recovered from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: Ulid,
    pub role: Role,
}

pub trait CredentialService: Send + Sync {
    fn hash_password(&self, password: &str) -> Result<String, CredentialError>;
    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, CredentialError>;
    fn issue_token(&self, user_id: Ulid, role: Role) -> Result<String, CredentialError>;
    fn parse_token(&self, token: &str) -> Result<TokenIdentity, CredentialError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
}

pub struct Argon2JwtCredentials {
    params: Params,
    secret: Vec<u8>,
    ttl_minutes: i64,
}

impl Argon2JwtCredentials {
    /// Argon2id with the crate's default cost parameters.
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            params: Params::default(),
            secret: secret.as_bytes().to_vec(),
            ttl_minutes,
        }
    }

    /// Custom Argon2 cost (memory KiB, iterations, lanes).
    pub fn with_cost(
        secret: &str,
        ttl_minutes: i64,
        m_cost: u32,
        t_cost: u32,
        p_cost: u32,
    ) -> Result<Self, CredentialError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| CredentialError::Hash(e.to_string()))?;
        Ok(Self {
            params,
            secret: secret.as_bytes().to_vec(),
            ttl_minutes,
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialService for Argon2JwtCredentials {
    fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, CredentialError> {
        let parsed = PasswordHash::new(hash).map_err(|e| CredentialError::Hash(e.to_string()))?;
        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::Hash(e.to_string())),
        }
    }

    fn issue_token(&self, user_id: Ulid, role: Role) -> Result<String, CredentialError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now + self.ttl_minutes * 60,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| CredentialError::Token(e.to_string()))
    }

    fn parse_token(&self, token: &str) -> Result<TokenIdentity, CredentialError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map_err(|e| CredentialError::InvalidToken(e.to_string()))?;
        let user_id = Ulid::from_string(&data.claims.sub)
            .map_err(|e| CredentialError::InvalidToken(format!("bad subject: {e}")))?;
        Ok(TokenIdentity {
            user_id,
            role: data.claims.role,
        })
    }
}
