//! Credential codec: issuing and verifying signed access and refresh tokens.
//!
//! Tokens are JWTs signed with Ed25519 (EdDSA). Only the private key can sign;
//! the public key alone is enough to verify. Expiry is not enforced while
//! decoding, so an expired access token still yields its claims
//! (and its CSRF secret) to drive silent rotation. Callers decide expiry with
//! [`is_expired`].

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;
use crate::keys::{KeyError, KeyMaterial};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token, stateless, carries the CSRF secret
    Access,
    /// Long-lived refresh token, tracked in the registry by JTI
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// User role
    pub role: UserRole,
    /// CSRF secret the client must echo in the `X-CSRF-Token` header
    pub csrf: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens (tracked with JTI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID (unique identifier for revocation tracking)
    pub jti: String,
    /// Subject (user UUID)
    pub sub: String,
    /// User role, needed to mint an access token when the old one is gone
    pub role: UserRole,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 72 hours
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 72 * 60 * 60;

/// Random bytes in a CSRF secret before encoding.
pub const CSRF_SECRET_BYTES: usize = 32;

/// How long issued tokens live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: ACCESS_TOKEN_DURATION_SECS,
            refresh_secs: REFRESH_TOKEN_DURATION_SECS,
        }
    }
}

/// Result of issuing an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// The CSRF secret embedded in the token
    pub csrf_secret: String,
    /// The signed claims
    pub claims: AccessClaims,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of issuing a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    /// The JWT token string
    pub token: String,
    /// JWT ID (unique identifier for registry tracking)
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Signs and verifies credentials. Holds key material only, no state.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    /// Primary verification key first, then any retired keys still accepted.
    decoding_keys: Vec<DecodingKey>,
    validation: Validation,
    lifetimes: TokenLifetimes,
}

impl TokenCodec {
    /// Create a codec from an Ed25519 key pair.
    pub fn new(keys: &KeyMaterial, lifetimes: TokenLifetimes) -> Result<Self, KeyError> {
        let encoding_key = EncodingKey::from_ed_pem(keys.private_pem()).map_err(KeyError::Jwt)?;
        let decoding_key = DecodingKey::from_ed_pem(keys.public_pem()).map_err(KeyError::Jwt)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        // Expiry is checked by the caller so expired tokens can still drive rotation.
        validation.validate_exp = false;

        Ok(Self {
            encoding_key,
            decoding_keys: vec![decoding_key],
            validation,
            lifetimes,
        })
    }

    /// Also accept tokens signed by the private half of `public_pem`.
    /// Verification-only; new tokens are always signed with the primary key.
    pub fn with_verification_key(mut self, public_pem: &[u8]) -> Result<Self, KeyError> {
        let key = DecodingKey::from_ed_pem(public_pem).map_err(KeyError::Jwt)?;
        self.decoding_keys.push(key);
        Ok(self)
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Issue an access token with a fresh CSRF secret.
    pub fn issue_access(&self, subject: &str, role: UserRole) -> Result<AccessTokenResult, CodecError> {
        self.issue_access_at(subject, role, unix_now()?)
    }

    /// Issue an access token as if the current time were `now`.
    pub fn issue_access_at(
        &self,
        subject: &str,
        role: UserRole,
        now: u64,
    ) -> Result<AccessTokenResult, CodecError> {
        let csrf_secret = generate_csrf_secret();
        let claims = AccessClaims {
            sub: subject.to_string(),
            role,
            csrf: csrf_secret.clone(),
            token_type: TokenType::Access,
            iat: now,
            exp: now.saturating_add(self.lifetimes.access_secs),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)
            .map_err(CodecError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            csrf_secret,
            claims,
            duration: self.lifetimes.access_secs,
        })
    }

    /// Issue a refresh token with a fresh JTI. The caller must register it.
    pub fn issue_refresh(&self, subject: &str, role: UserRole) -> Result<RefreshTokenResult, CodecError> {
        self.issue_refresh_at(subject, role, unix_now()?)
    }

    /// Issue a refresh token as if the current time were `now`.
    pub fn issue_refresh_at(
        &self,
        subject: &str,
        role: UserRole,
        now: u64,
    ) -> Result<RefreshTokenResult, CodecError> {
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now.saturating_add(self.lifetimes.refresh_secs);

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: subject.to_string(),
            role,
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)
            .map_err(CodecError::Encoding)?;

        Ok(RefreshTokenResult {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration: self.lifetimes.refresh_secs,
        })
    }

    /// Verify the signature of `token` and decode it as the `expected` kind.
    /// Does not check expiry.
    pub fn verify<C: DeserializeOwned>(&self, token: &str, expected: TokenType) -> Result<C, CodecError> {
        for key in &self.decoding_keys {
            match jsonwebtoken::decode::<serde_json::Value>(token, key, &self.validation) {
                Ok(data) => return decode_kind(data.claims, expected),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature => continue,
                    // Algorithm substitution is a forgery attempt, not a parse problem.
                    ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
                        return Err(CodecError::InvalidSignature);
                    }
                    _ => return Err(CodecError::Malformed),
                },
            }
        }
        Err(CodecError::InvalidSignature)
    }

    /// Verify and decode an access token. Does not check expiry.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, CodecError> {
        self.verify(token, TokenType::Access)
    }

    /// Verify and decode a refresh token. Does not check expiry.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, CodecError> {
        self.verify(token, TokenType::Refresh)
    }
}

fn decode_kind<C: DeserializeOwned>(claims: serde_json::Value, expected: TokenType) -> Result<C, CodecError> {
    let typ = claims
        .get("typ")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::Malformed)?;
    if typ != expected.as_str() {
        return Err(CodecError::WrongKind);
    }
    serde_json::from_value(claims).map_err(|_| CodecError::Malformed)
}

/// Whether a token with expiry `exp` is expired at `now`.
pub fn is_expired(exp: u64, now: u64) -> bool {
    now >= exp
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, CodecError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| CodecError::TimeError)
}

/// Generate a CSRF secret from the OS CSPRNG, base64url without padding.
pub fn generate_csrf_secret() -> String {
    let mut bytes = [0u8; CSRF_SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Errors that can occur during token operations.
#[derive(Debug)]
pub enum CodecError {
    /// Signature did not verify against any accepted key
    InvalidSignature,
    /// Token is structurally unparseable
    Malformed,
    /// Token is valid but of the other kind (e.g., refresh used as access)
    WrongKind,
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::InvalidSignature => write!(f, "Invalid token signature"),
            CodecError::Malformed => write!(f, "Malformed token"),
            CodecError::WrongKind => write!(f, "Wrong token type"),
            CodecError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            CodecError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for CodecError {}
