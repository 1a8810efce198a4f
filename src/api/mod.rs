mod error;
mod session;
mod tokens;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::gateway::AuthGateway;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    gateway: Arc<AuthGateway>,
    secure_cookies: bool,
    no_signup: bool,
) -> Router {
    let session_state = session::SessionState {
        db: db.clone(),
        gateway: gateway.clone(),
        secure_cookies,
    };

    let tokens_state = tokens::TokensState {
        gateway: gateway.clone(),
        secure_cookies,
    };

    let users_state = users::UsersState {
        db,
        gateway,
        secure_cookies,
        no_signup,
    };

    Router::new()
        .merge(session::router(session_state))
        .merge(users::router(users_state))
        .nest("/tokens", tokens::router(tokens_state))
}
