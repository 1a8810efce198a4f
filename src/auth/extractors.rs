//! Axum extractors for authentication.

use std::cell::RefCell;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, Method, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, get_cookie, token_cookie};
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::gateway::{CSRF_HEADER_NAME, Decision, DenyReason, NewCredentials};
use crate::rotation::RotationError;

/// Credentials minted during a request, waiting to be written to the response.
#[derive(Debug, Clone, Default)]
pub struct IssuedCredentials {
    pub set_cookies: Vec<String>,
    pub csrf_token: Option<String>,
    /// Id of a refresh token registered during this request
    pub renewed_jti: Option<String>,
}

tokio::task_local! {
    /// Task-local storage for credentials minted by the auth extractor.
    /// Used to pass them from the extractor to the response middleware.
    pub static ISSUED_CREDENTIALS: RefCell<IssuedCredentials>;
}

/// Queue credentials for the response. A no-op outside [`add_issued_credentials`].
fn queue_credentials(issued: IssuedCredentials) {
    let _ = ISSUED_CREDENTIALS.try_with(|cell| {
        *cell.borrow_mut() = issued;
    });
}

/// Drop any credentials queued during this request and return them.
/// Handlers that end a session call this so a rotation in the same request
/// does not resurrect it.
pub fn take_issued_credentials() -> IssuedCredentials {
    ISSUED_CREDENTIALS
        .try_with(|cell| std::mem::take(&mut *cell.borrow_mut()))
        .unwrap_or_default()
}

/// Build cookies and the CSRF header value for freshly minted credentials.
fn issued_from(new: &NewCredentials, secure: bool) -> IssuedCredentials {
    let mut set_cookies = vec![token_cookie(
        ACCESS_COOKIE_NAME,
        &new.access.token,
        new.access.duration,
        secure,
    )];
    if let Some(refresh) = &new.refresh {
        set_cookies.push(token_cookie(
            REFRESH_COOKIE_NAME,
            &refresh.token,
            refresh.duration,
            secure,
        ));
    }
    IssuedCredentials {
        set_cookies,
        csrf_token: Some(new.access.csrf_secret.clone()),
        renewed_jti: new.refresh.as_ref().map(|r| r.jti.clone()),
    }
}

/// Methods that may be granted on a rotation not bound to a CSRF secret.
fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Core authentication logic: hand cookies and CSRF header to the gateway.
async fn authenticate_request<S>(
    parts: &Parts,
    state: &S,
) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    let raw_access = get_cookie(&parts.headers, ACCESS_COOKIE_NAME);
    let raw_refresh = get_cookie(&parts.headers, REFRESH_COOKIE_NAME);
    let csrf_header = parts
        .headers
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok());

    let decision = state
        .gateway()
        .authorize(raw_access, raw_refresh, csrf_header)
        .await
        .map_err(|e| {
            error!(error = %e, "Authorization could not be completed");
            match e {
                RotationError::Registry(_) => AuthErrorKind::RegistryUnavailable,
                RotationError::Codec(_) => AuthErrorKind::Internal,
            }
        })?;

    match decision {
        Decision::Allow(claims) => Ok(AuthenticatedUser {
            claims,
            rotated: false,
        }),
        Decision::AllowWithNewCredentials(new) => {
            queue_credentials(issued_from(&new, state.secure_cookies()));

            if !new.csrf_bound && !is_safe_method(&parts.method) {
                warn!(
                    subject = %new.claims().sub,
                    method = %parts.method,
                    "CSRF token missing on unsafe request after rotation"
                );
                return Err(AuthErrorKind::Denied(DenyReason::CsrfMismatch));
            }

            Ok(AuthenticatedUser {
                claims: new.access.claims,
                rotated: true,
            })
        }
        Decision::Deny(reason) => Err(AuthErrorKind::Denied(reason)),
    }
}

/// Extractor for API endpoints that require authentication.
/// Verifies the access token and CSRF header; if the access token expired,
/// rotates it using the refresh token. Returns JSON errors.
pub struct ApiAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for ApiAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state)
            .await
            .map(ApiAuth)
            .map_err(|kind| ApiAuthError::new(kind, state.secure_cookies()))
    }
}

/// Middleware that writes credentials minted during the request onto the response.
/// Applies to error responses too, so a refused unsafe request still hands the
/// client a usable session.
pub async fn add_issued_credentials(request: Request, next: Next) -> Response {
    ISSUED_CREDENTIALS
        .scope(RefCell::new(IssuedCredentials::default()), async move {
            let mut response = next.run(request).await;

            let issued = take_issued_credentials();
            let headers = response.headers_mut();
            for cookie in issued.set_cookies {
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    headers.append(header::SET_COOKIE, value);
                }
            }
            if let Some(csrf) = issued.csrf_token {
                if let Ok(value) = HeaderValue::from_str(&csrf) {
                    headers.insert(CSRF_HEADER_NAME, value);
                }
            }

            response
        })
        .await
}
