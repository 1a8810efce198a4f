//! Silent rotation of access tokens against registered refresh tokens.
//!
//! | Access                  | Refresh                                   | Outcome               |
//! |-------------------------|-------------------------------------------|-----------------------|
//! | valid, not expired      | ignored                                   | Allow                 |
//! | bad signature           | ignored                                   | Deny invalid-signature|
//! | expired or lost         | bad signature                             | Deny invalid-signature|
//! | expired or lost         | absent, malformed or expired              | Deny expired-no-refresh|
//! | expired or lost         | not registered, revoked, wrong subject    | Deny revoked          |
//! | expired or lost         | registered and live                       | Rotate                |
//!
//! A rotation keeps the refresh token unless it is inside the renewal window,
//! in which case the old JTI is swapped for a new one. If the old JTI was
//! revoked in the meantime the swap fails and the request is denied.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::jwt::{
    AccessClaims, AccessTokenResult, CodecError, RefreshTokenResult, TokenCodec, is_expired,
};
use crate::registry::{RefreshRegistry, RegistryEntry, RegistryError};

/// Default renewal window: refresh tokens with less than a day left are replaced.
pub const DEFAULT_RENEWAL_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Why a request was denied. The string form is the reason code reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Access token expired (or lost) and no usable refresh token
    ExpiredNoRefresh,
    /// CSRF header missing or not equal to the secret in the access token
    CsrfMismatch,
    /// A token failed signature verification
    InvalidSignature,
    /// Refresh token is not (or no longer) registered
    Revoked,
    /// No credentials at all
    NotAuthenticated,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ExpiredNoRefresh => "expired-no-refresh",
            DenyReason::CsrfMismatch => "csrf-mismatch",
            DenyReason::InvalidSignature => "invalid-signature",
            DenyReason::Revoked => "revoked",
            DenyReason::NotAuthenticated => "not-authenticated",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The access token as seen by the engine.
#[derive(Debug, Clone)]
pub enum AccessState {
    /// Signature good, not expired
    Valid(AccessClaims),
    /// Signature good, expired
    Expired(AccessClaims),
    /// Signature did not verify
    Forged,
    /// Absent, malformed, or the wrong kind of token
    Lost,
}

impl AccessState {
    /// Classify a raw access token.
    pub fn classify(codec: &TokenCodec, raw: Option<&str>, now: u64) -> Self {
        let Some(raw) = raw else {
            return AccessState::Lost;
        };
        match codec.verify_access(raw) {
            Ok(claims) if is_expired(claims.exp, now) => AccessState::Expired(claims),
            Ok(claims) => AccessState::Valid(claims),
            Err(CodecError::InvalidSignature) => AccessState::Forged,
            Err(_) => AccessState::Lost,
        }
    }

    /// Claims of a token whose signature verified, expired or not.
    pub fn claims(&self) -> Option<&AccessClaims> {
        match self {
            AccessState::Valid(claims) | AccessState::Expired(claims) => Some(claims),
            AccessState::Forged | AccessState::Lost => None,
        }
    }
}

/// Outcome of evaluating a request's credentials.
#[derive(Debug, Clone)]
pub enum RotationOutcome {
    /// Access token valid as presented
    Allow(AccessClaims),
    /// New access token minted; `refresh` is set only when the refresh token was renewed
    Rotate {
        access: AccessTokenResult,
        refresh: Option<RefreshTokenResult>,
    },
    Deny(DenyReason),
}

/// Decides between allow, rotate and deny. Holds no state of its own.
#[derive(Clone)]
pub struct RotationEngine {
    codec: Arc<TokenCodec>,
    registry: Arc<dyn RefreshRegistry>,
    renewal_window_secs: u64,
}

impl RotationEngine {
    pub fn new(
        codec: Arc<TokenCodec>,
        registry: Arc<dyn RefreshRegistry>,
        renewal_window_secs: u64,
    ) -> Self {
        Self {
            codec,
            registry,
            renewal_window_secs,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<dyn RefreshRegistry> {
        &self.registry
    }

    /// Evaluate an access state and optional raw refresh token at time `now`.
    pub async fn evaluate(
        &self,
        access: AccessState,
        raw_refresh: Option<&str>,
        now: u64,
    ) -> Result<RotationOutcome, RotationError> {
        let previous = match access {
            AccessState::Valid(claims) => return Ok(RotationOutcome::Allow(claims)),
            AccessState::Forged => return Ok(RotationOutcome::Deny(DenyReason::InvalidSignature)),
            AccessState::Expired(claims) => Some(claims),
            AccessState::Lost => None,
        };

        let Some(raw_refresh) = raw_refresh else {
            let reason = if previous.is_some() {
                DenyReason::ExpiredNoRefresh
            } else {
                DenyReason::NotAuthenticated
            };
            return Ok(RotationOutcome::Deny(reason));
        };

        let refresh = match self.codec.verify_refresh(raw_refresh) {
            Ok(claims) => claims,
            Err(CodecError::InvalidSignature) => {
                warn!("Refresh token failed signature verification");
                return Ok(RotationOutcome::Deny(DenyReason::InvalidSignature));
            }
            Err(_) => return Ok(RotationOutcome::Deny(DenyReason::ExpiredNoRefresh)),
        };

        if is_expired(refresh.exp, now) {
            return Ok(RotationOutcome::Deny(DenyReason::ExpiredNoRefresh));
        }

        if let Some(previous) = &previous {
            if previous.sub != refresh.sub {
                warn!(
                    access_subject = %previous.sub,
                    refresh_subject = %refresh.sub,
                    "Access and refresh tokens belong to different subjects"
                );
                return Ok(RotationOutcome::Deny(DenyReason::Revoked));
            }
        }

        let registered = self
            .registry
            .lookup(&refresh.jti)
            .await
            .map_err(RotationError::Registry)?;
        match registered {
            Some(entry) if entry.subject == refresh.sub && entry.is_live(now) => {}
            _ => {
                debug!(subject = %refresh.sub, "Refresh token not registered");
                return Ok(RotationOutcome::Deny(DenyReason::Revoked));
            }
        }

        let access = self
            .codec
            .issue_access_at(&refresh.sub, refresh.role, now)
            .map_err(RotationError::Codec)?;

        let renewed = if refresh.exp.saturating_sub(now) <= self.renewal_window_secs {
            let renewed = self
                .codec
                .issue_refresh_at(&refresh.sub, refresh.role, now)
                .map_err(RotationError::Codec)?;
            let entry = RegistryEntry {
                jti: renewed.jti.clone(),
                subject: refresh.sub.clone(),
                issued_at: renewed.issued_at,
                expires_at: renewed.expires_at,
            };
            let swapped = self
                .registry
                .replace(entry, &refresh.jti)
                .await
                .map_err(RotationError::Registry)?;
            if !swapped {
                warn!(subject = %refresh.sub, "Refresh token revoked during renewal");
                return Ok(RotationOutcome::Deny(DenyReason::Revoked));
            }
            Some(renewed)
        } else {
            None
        };

        info!(
            subject = %refresh.sub,
            access_lost = previous.is_none(),
            refresh_renewed = renewed.is_some(),
            "Rotated access token"
        );

        Ok(RotationOutcome::Rotate {
            access,
            refresh: renewed,
        })
    }
}

/// Failures that are not a deny decision: the request cannot be answered.
#[derive(Debug)]
pub enum RotationError {
    /// Registry could not be consulted (retryable, fail closed)
    Registry(RegistryError),
    /// Minting a new token failed
    Codec(CodecError),
}

impl std::fmt::Display for RotationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationError::Registry(e) => write!(f, "{}", e),
            RotationError::Codec(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RotationError {}
