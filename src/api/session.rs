//! Session API endpoints.
//!
//! - POST `/login` - Verify password, issue access + refresh tokens
//! - GET `/restricted` - Gated resource, echoes the caller's identity
//! - POST `/logout` - Revoke the presented refresh token and clear cookies
//! - POST `/logout-all` - Revoke every refresh token of the caller

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, MAX_PASSWORD_LENGTH, ResultExt};
use crate::auth::{
    ACCESS_COOKIE_NAME, ApiAuth, REFRESH_COOKIE_NAME, clear_cookie, get_cookie,
    take_issued_credentials, token_cookie,
};
use crate::db::{Database, UserRole};
use crate::gateway::{AuthGateway, CSRF_HEADER_NAME};
use crate::impl_has_auth_backend;
use crate::registry::RegistryEntry;

#[derive(Clone)]
pub struct SessionState {
    pub db: Database,
    pub gateway: Arc<AuthGateway>,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(SessionState);

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/restricted", get(restricted))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    uuid: String,
    role: UserRole,
    csrf_token: String,
}

async fn login(
    State(state): State<SessionState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let user = state
        .db
        .users()
        .verify_credentials(payload.username.trim(), &payload.password)
        .await
        .db_err("Failed to verify credentials")?
        .ok_or_else(|| {
            warn!("Failed login attempt");
            ApiError::unauthorized("Invalid username or password")
        })?;

    let codec = state.gateway.codec();
    let access = codec
        .issue_access(&user.uuid, user.role)
        .internal_err("Failed to generate token")?;
    let refresh = codec
        .issue_refresh(&user.uuid, user.role)
        .internal_err("Failed to generate token")?;

    state
        .gateway
        .registry()
        .put(RegistryEntry {
            jti: refresh.jti.clone(),
            subject: user.uuid.clone(),
            issued_at: refresh.issued_at,
            expires_at: refresh.expires_at,
        })
        .await
        .registry_err("Failed to register refresh token")?;

    info!(subject = %user.uuid, "User logged in");

    let access_cookie = token_cookie(
        ACCESS_COOKIE_NAME,
        &access.token,
        access.duration,
        state.secure_cookies,
    );
    let refresh_cookie = token_cookie(
        REFRESH_COOKIE_NAME,
        &refresh.token,
        refresh.duration,
        state.secure_cookies,
    );

    Ok((
        StatusCode::OK,
        AppendHeaders([
            (SET_COOKIE, access_cookie),
            (SET_COOKIE, refresh_cookie),
            (
                HeaderName::from_static(CSRF_HEADER_NAME),
                access.csrf_secret.clone(),
            ),
        ]),
        Json(LoginResponse {
            uuid: user.uuid,
            role: user.role,
            csrf_token: access.csrf_secret,
        }),
    ))
}

#[derive(Serialize)]
struct RestrictedResponse {
    uuid: String,
    role: UserRole,
    /// True when this request minted a new access token
    rotated: bool,
}

async fn restricted(ApiAuth(auth): ApiAuth) -> impl IntoResponse {
    Json(RestrictedResponse {
        uuid: auth.claims.sub,
        role: auth.claims.role,
        rotated: auth.rotated,
    })
}

#[derive(Serialize)]
struct LogoutResponse {
    revoked: u64,
}

/// Revoke the presented refresh token and clear both cookies.
async fn logout(
    State(state): State<SessionState>,
    ApiAuth(auth): ApiAuth,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.gateway.registry();
    let mut revoked = 0;

    // A renewal during this very request registered a token the client never receives.
    if let Some(jti) = take_issued_credentials().renewed_jti {
        if registry.revoke(&jti).await.registry_err("Failed to revoke token")? {
            revoked += 1;
        }
    }

    if let Some(refresh_token) = get_cookie(&headers, REFRESH_COOKIE_NAME) {
        if let Ok(claims) = state.gateway.codec().verify_refresh(refresh_token) {
            if claims.sub == auth.uuid()
                && registry
                    .revoke(&claims.jti)
                    .await
                    .registry_err("Failed to revoke token")?
            {
                revoked += 1;
            }
        }
    }

    info!(subject = %auth.uuid(), revoked, "User logged out");

    Ok((
        StatusCode::OK,
        clear_cookies(state.secure_cookies),
        Json(LogoutResponse { revoked }),
    ))
}

/// Revoke every refresh token of the caller (logout everywhere).
async fn logout_all(
    State(state): State<SessionState>,
    ApiAuth(auth): ApiAuth,
) -> Result<impl IntoResponse, ApiError> {
    take_issued_credentials();

    let revoked = state
        .gateway
        .registry()
        .revoke_all(auth.uuid())
        .await
        .registry_err("Failed to revoke tokens")?;

    info!(subject = %auth.uuid(), revoked, "User logged out everywhere");

    Ok((
        StatusCode::OK,
        clear_cookies(state.secure_cookies),
        Json(LogoutResponse { revoked }),
    ))
}

/// `Set-Cookie` headers deleting both token cookies.
pub(super) fn clear_cookies(secure: bool) -> AppendHeaders<[(HeaderName, String); 2]> {
    AppendHeaders([
        (SET_COOKIE, clear_cookie(ACCESS_COOKIE_NAME, secure)),
        (SET_COOKIE, clear_cookie(REFRESH_COOKIE_NAME, secure)),
    ])
}
