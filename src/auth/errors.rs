//! Authentication error types.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie};
use crate::gateway::DenyReason;

/// Internal auth error kind used by the core authentication logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The gateway denied the request
    Denied(DenyReason),
    /// The revocation registry could not be consulted (retryable)
    RegistryUnavailable,
    /// Minting a credential failed
    Internal,
}

/// API authentication errors (JSON body, clears cookies on hard denials).
#[derive(Debug)]
pub struct ApiAuthError {
    pub(super) kind: AuthErrorKind,
    pub(super) secure_cookies: bool,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind, secure_cookies: bool) -> Self {
        Self {
            kind,
            secure_cookies,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::Denied(DenyReason::CsrfMismatch) => StatusCode::FORBIDDEN,
            AuthErrorKind::Denied(_) => StatusCode::UNAUTHORIZED,
            AuthErrorKind::RegistryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::Denied(DenyReason::ExpiredNoRefresh) => "Session expired",
            AuthErrorKind::Denied(DenyReason::CsrfMismatch) => "CSRF token missing or invalid",
            AuthErrorKind::Denied(DenyReason::InvalidSignature) => "Invalid token",
            AuthErrorKind::Denied(DenyReason::Revoked) => "Session has been revoked",
            AuthErrorKind::Denied(DenyReason::NotAuthenticated) => "Not authenticated",
            AuthErrorKind::RegistryUnavailable => "Service temporarily unavailable",
            AuthErrorKind::Internal => "Internal error",
        }
    }

    fn reason(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::Denied(reason) => reason.as_str(),
            AuthErrorKind::RegistryUnavailable => "registry-unavailable",
            AuthErrorKind::Internal => "internal",
        }
    }

    /// A CSRF failure may be attacker-induced, so it must not log the victim out.
    fn clears_cookies(&self) -> bool {
        matches!(self.kind, AuthErrorKind::Denied(reason) if reason != DenyReason::CsrfMismatch)
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        use axum::Json;
        use serde::Serialize;

        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            reason: &'static str,
        }

        let mut response = (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
                reason: self.reason(),
            }),
        )
            .into_response();

        if self.clears_cookies() {
            let headers = response.headers_mut();
            for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
                if let Ok(value) = HeaderValue::from_str(&clear_cookie(name, self.secure_cookies)) {
                    headers.append(header::SET_COOKIE, value);
                }
            }
        }

        response
    }
}
