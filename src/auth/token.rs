//! Signed session tokens.
//!
//! Two kinds share one HS256 secret: short-lived access tokens carried on every
//! request and longer-lived refresh tokens that only mint new pairs. The `kind`
//! claim keeps them apart. Nothing is stored server-side; a token is valid
//! strictly before its `exp` instant.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use ulid::Ulid;
use uuid::Uuid;

pub const MIN_SECRET_BYTES: usize = 32;
const DEFAULT_ISSUER: &str = "custodian";
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token secret must be at least 32 bytes")]
    WeakSecret,
    #[error("token ttl must be positive")]
    InvalidTtl,
    #[error("token has expired")]
    Expired,
    #[error("token is malformed or its signature does not match")]
    Invalid,
    #[error("expected a {expected} token")]
    WrongKind { expected: TokenKind },
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    kind: TokenKind,
    iss: String,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

/// A freshly minted access/refresh pair and the lifetimes used for cookies.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

/// Result of looking at an optional token without failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    Valid(Uuid),
    Invalid,
    Absent,
}

#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.config.issuer)
            .field("access_ttl_seconds", &self.config.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.config.refresh_ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// # Errors
    /// Returns `WeakSecret` for secrets shorter than 32 bytes and `InvalidTtl`
    /// for non-positive lifetimes.
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        let secret = config.secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::WeakSecret);
        }
        if config.access_ttl_seconds <= 0 || config.refresh_ttl_seconds <= 0 {
            return Err(TokenError::InvalidTtl);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock in `validate_at`, without leeway.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// # Errors
    /// Returns `Signing` if the claims cannot be encoded.
    pub fn issue(&self, subject: Uuid) -> Result<TokenPair, TokenError> {
        self.issue_at(subject, unix_now())
    }

    /// # Errors
    /// Returns `Signing` if the claims cannot be encoded.
    pub fn issue_at(&self, subject: Uuid, now: i64) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.sign(subject, TokenKind::Access, now)?,
            refresh_token: self.sign(subject, TokenKind::Refresh, now)?,
            access_ttl_seconds: self.config.access_ttl_seconds,
            refresh_ttl_seconds: self.config.refresh_ttl_seconds,
        })
    }

    fn sign(&self, subject: Uuid, kind: TokenKind, now: i64) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl_seconds,
            TokenKind::Refresh => self.config.refresh_ttl_seconds,
        };
        let claims = Claims {
            sub: subject.to_string(),
            kind,
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + ttl,
            jti: Ulid::new().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// # Errors
    /// See [`TokenService::validate_at`].
    pub fn validate(&self, token: &str, kind: TokenKind) -> Result<Uuid, TokenError> {
        self.validate_at(token, kind, unix_now())
    }

    /// Verify signature, issuer, kind and expiry, and return the subject.
    ///
    /// # Errors
    /// Returns `Invalid` for anything that does not verify, `WrongKind` for a
    /// token of the other kind, and `Expired` once `now >= exp`.
    pub fn validate_at(&self, token: &str, kind: TokenKind, now: i64) -> Result<Uuid, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| TokenError::Invalid)?;
        let claims = data.claims;

        if claims.kind != kind {
            return Err(TokenError::WrongKind { expected: kind });
        }
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid)
    }

    /// Tri-state view of an optional token. Never fails.
    #[must_use]
    pub fn inspect(&self, token: Option<&str>, kind: TokenKind) -> TokenStatus {
        self.inspect_at(token, kind, unix_now())
    }

    #[must_use]
    pub fn inspect_at(&self, token: Option<&str>, kind: TokenKind, now: i64) -> TokenStatus {
        match token {
            None => TokenStatus::Absent,
            Some(token) if token.is_empty() => TokenStatus::Absent,
            Some(token) => match self.validate_at(token, kind, now) {
                Ok(subject) => TokenStatus::Valid(subject),
                Err(_) => TokenStatus::Invalid,
            },
        }
    }
}

/// Seconds since the Unix epoch; a clock before 1970 reads as 0.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}
