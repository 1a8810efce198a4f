//! Request-facing authorization policy.
//!
//! The gateway verifies the access token, checks the double-submitted CSRF
//! header against the secret embedded in that token, and only then lets the
//! rotation engine decide on expiry. The CSRF comparison runs before any grant,
//! rotated grants included.

use subtle::ConstantTimeEq;
use tracing::warn;

use crate::jwt::{AccessClaims, AccessTokenResult, RefreshTokenResult, TokenCodec, unix_now};
use crate::registry::RefreshRegistry;
use crate::rotation::{AccessState, RotationEngine, RotationError, RotationOutcome};

pub use crate::rotation::DenyReason;

/// Header the client echoes the CSRF secret in.
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Credentials minted while authorizing a request.
#[derive(Debug, Clone)]
pub struct NewCredentials {
    pub access: AccessTokenResult,
    /// Present only when the refresh token was renewed
    pub refresh: Option<RefreshTokenResult>,
    /// False when there was no verifiable access token to bind the CSRF header to.
    /// Such a request must not be granted for state-changing methods.
    pub csrf_bound: bool,
}

impl NewCredentials {
    pub fn claims(&self) -> &AccessClaims {
        &self.access.claims
    }
}

/// Authorization decision for one request.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow(AccessClaims),
    AllowWithNewCredentials(NewCredentials),
    Deny(DenyReason),
}

#[derive(Clone)]
pub struct AuthGateway {
    engine: RotationEngine,
}

impl AuthGateway {
    pub fn new(engine: RotationEngine) -> Self {
        Self { engine }
    }

    pub fn codec(&self) -> &TokenCodec {
        self.engine.codec()
    }

    pub fn registry(&self) -> &std::sync::Arc<dyn RefreshRegistry> {
        self.engine.registry()
    }

    /// Authorize a request from its raw access token, raw refresh token and CSRF header.
    pub async fn authorize(
        &self,
        raw_access: Option<&str>,
        raw_refresh: Option<&str>,
        csrf_header: Option<&str>,
    ) -> Result<Decision, RotationError> {
        let now = unix_now().map_err(RotationError::Codec)?;
        self.authorize_at(raw_access, raw_refresh, csrf_header, now)
            .await
    }

    /// Same as [`authorize`](Self::authorize) with an explicit clock.
    pub async fn authorize_at(
        &self,
        raw_access: Option<&str>,
        raw_refresh: Option<&str>,
        csrf_header: Option<&str>,
        now: u64,
    ) -> Result<Decision, RotationError> {
        let access = AccessState::classify(self.engine.codec(), raw_access, now);

        let csrf_bound = match access.claims() {
            Some(claims) => {
                if !csrf_matches(&claims.csrf, csrf_header) {
                    warn!(
                        subject = %claims.sub,
                        header_present = csrf_header.is_some(),
                        "CSRF token mismatch"
                    );
                    return Ok(Decision::Deny(DenyReason::CsrfMismatch));
                }
                true
            }
            None => false,
        };

        if matches!(access, AccessState::Forged) {
            warn!("Access token failed signature verification");
        }

        let decision = match self.engine.evaluate(access, raw_refresh, now).await? {
            RotationOutcome::Allow(claims) => Decision::Allow(claims),
            RotationOutcome::Rotate { access, refresh } => {
                Decision::AllowWithNewCredentials(NewCredentials {
                    access,
                    refresh,
                    csrf_bound,
                })
            }
            RotationOutcome::Deny(reason) => Decision::Deny(reason),
        };
        Ok(decision)
    }
}

/// Constant-time comparison of the embedded secret with the presented header.
fn csrf_matches(expected: &str, presented: Option<&str>) -> bool {
    presented.is_some_and(|presented| bool::from(expected.as_bytes().ct_eq(presented.as_bytes())))
}
