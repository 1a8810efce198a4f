//! Session (refresh token) management API endpoints.
//!
//! - GET `/` - List active refresh tokens for current user
//! - DELETE `/{jti}` - Revoke specific refresh token (own token or admin)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::auth::{ApiAuth, REFRESH_COOKIE_NAME, get_cookie};
use crate::gateway::AuthGateway;
use crate::impl_has_auth_backend;
use crate::jwt::unix_now;

#[derive(Clone)]
pub struct TokensState {
    pub gateway: Arc<AuthGateway>,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(TokensState);

pub fn router(state: TokensState) -> Router {
    Router::new()
        .route("/", get(list_tokens))
        .route("/{jti}", delete(revoke_token))
        .with_state(state)
}

#[derive(Serialize)]
struct TokenInfo {
    jti: String,
    issued_at: u64,
    expires_at: u64,
    is_current: bool,
}

#[derive(Serialize)]
struct ListTokensResponse {
    tokens: Vec<TokenInfo>,
}

/// List all active refresh tokens for the current user, newest first.
async fn list_tokens(
    State(state): State<TokensState>,
    ApiAuth(auth): ApiAuth,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let now = unix_now().internal_err("Clock error")?;
    let entries = state
        .gateway
        .registry()
        .list(auth.uuid(), now)
        .await
        .registry_err("Failed to list tokens")?;

    let current_jti = get_cookie(&headers, REFRESH_COOKIE_NAME)
        .and_then(|token| state.gateway.codec().verify_refresh(token).ok())
        .map(|claims| claims.jti);

    let tokens = entries
        .into_iter()
        .map(|entry| TokenInfo {
            is_current: current_jti.as_deref() == Some(entry.jti.as_str()),
            jti: entry.jti,
            issued_at: entry.issued_at,
            expires_at: entry.expires_at,
        })
        .collect();

    Ok((StatusCode::OK, Json(ListTokensResponse { tokens })))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke a specific refresh token by JTI.
/// Users can revoke their own tokens, admins can revoke any token.
async fn revoke_token(
    State(state): State<TokensState>,
    ApiAuth(auth): ApiAuth,
    Path(jti): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.gateway.registry();
    let entry = registry
        .lookup(&jti)
        .await
        .registry_err("Failed to get token")?;

    let Some(entry) = entry else {
        // Already revoked or never existed
        return Ok((StatusCode::OK, Json(RevokeResponse { revoked: false })));
    };

    if entry.subject != auth.uuid() && !auth.is_admin() {
        return Err(ApiError::forbidden("Cannot revoke another user's token"));
    }

    let revoked = registry
        .revoke(&jti)
        .await
        .registry_err("Failed to revoke token")?;

    info!(subject = %entry.subject, by = %auth.uuid(), "Refresh token revoked");

    Ok((StatusCode::OK, Json(RevokeResponse { revoked })))
}
