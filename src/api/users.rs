//! User API endpoints.
//!
//! - POST `/register` - Create a password account
//! - DELETE `/users/{uuid}` - Delete an account (self or admin), revoking its sessions

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_password, validate_username, validate_uuid};
use super::session::clear_cookies;
use crate::auth::{ApiAuth, take_issued_credentials};
use crate::db::{Database, UserRole, hash_password};
use crate::gateway::AuthGateway;
use crate::impl_has_auth_backend;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub gateway: Arc<AuthGateway>,
    pub secure_cookies: bool,
    pub no_signup: bool,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/users/{uuid}", delete(delete_user))
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    uuid: String,
    username: String,
}

async fn register(
    State(state): State<UsersState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.no_signup {
        return Err(ApiError::forbidden("Signups are disabled"));
    }

    let username = payload.username.trim();
    validate_username(username)?;
    validate_password(&payload.password)?;

    let available = state
        .db
        .users()
        .is_username_available(username)
        .await
        .db_err("Failed to check username availability")?;

    if !available {
        return Err(ApiError::conflict("Username is already taken"));
    }

    let password_hash = hash_password(&payload.password)
        .await
        .internal_err("Failed to hash password")?;

    let uuid = uuid::Uuid::new_v4().to_string();
    match state
        .db
        .users()
        .create(&uuid, username, &password_hash, UserRole::User)
        .await
    {
        Ok(_) => {}
        // Lost a race against a concurrent registration of the same name.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(ApiError::conflict("Username is already taken"));
        }
        Err(e) => return Err(ApiError::db_error("Failed to create user", e)),
    }

    info!(subject = %uuid, username = %username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            uuid,
            username: username.to_string(),
        }),
    ))
}

#[derive(Serialize)]
struct DeleteUserResponse {
    deleted: bool,
    revoked: u64,
}

async fn delete_user(
    State(state): State<UsersState>,
    ApiAuth(auth): ApiAuth,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&uuid)?;

    let is_self = auth.uuid() == uuid;
    if !is_self && !auth.is_admin() {
        return Err(ApiError::forbidden("Cannot delete another user"));
    }

    state
        .db
        .users()
        .get_by_uuid(&uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // Sessions go first so a failure here leaves the account intact.
    let revoked = state
        .gateway
        .registry()
        .revoke_all(&uuid)
        .await
        .registry_err("Failed to revoke tokens")?;

    let deleted = state
        .db
        .users()
        .delete(&uuid)
        .await
        .db_err("Failed to delete user")?;

    info!(subject = %uuid, by = %auth.uuid(), revoked, "User deleted");

    let body = Json(DeleteUserResponse { deleted, revoked });
    if is_self {
        take_issued_credentials();
        Ok((StatusCode::OK, clear_cookies(state.secure_cookies), body).into_response())
    } else {
        Ok((StatusCode::OK, body).into_response())
    }
}
