pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod gateway;
pub mod jwt;
pub mod keys;
pub mod registry;
pub mod rotation;

use api::create_api_router;
use auth::add_issued_credentials;
use axum::{Router, middleware};
use db::Database;
use gateway::AuthGateway;
use jwt::{TokenCodec, TokenLifetimes};
use keys::{KeyError, KeyMaterial};
use registry::RefreshRegistry;
use rotation::RotationEngine;
use std::sync::Arc;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Request authorization policy (codec, registry and rotation engine)
    pub gateway: Arc<AuthGateway>,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// Whether new user signups are disabled
    pub no_signup: bool,
}

/// Key and lifetime settings for building an [`AuthGateway`].
pub struct GatewaySettings {
    pub keys: KeyMaterial,
    /// Additional public keys accepted for verification only
    pub verification_keys: Vec<Vec<u8>>,
    pub lifetimes: TokenLifetimes,
    pub renewal_window_secs: u64,
}

/// Assemble the codec, rotation engine and gateway over a registry backend.
pub fn build_gateway(
    settings: &GatewaySettings,
    registry: Arc<dyn RefreshRegistry>,
) -> Result<AuthGateway, KeyError> {
    let mut codec = TokenCodec::new(&settings.keys, settings.lifetimes)?;
    for pem in &settings.verification_keys {
        codec = codec.with_verification_key(pem)?;
    }
    let engine = RotationEngine::new(Arc::new(codec), registry, settings.renewal_window_secs);
    Ok(AuthGateway::new(engine))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let api_router = create_api_router(
        config.db.clone(),
        config.gateway.clone(),
        config.secure_cookies,
        config.no_signup,
    )
    .layer(middleware::from_fn(add_issued_credentials));

    Router::new().nest("/api", api_router)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(registry: Arc<dyn RefreshRegistry>) {
    cleanup::run_cleanup(registry.as_ref()).await;
    cleanup::spawn_cleanup_scheduler(registry);
}
