#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use sentinel::{
    GatewaySettings, ServerConfig, build_gateway, create_app,
    db::{Database, TokenStore, UserRole, hash_password},
    gateway::AuthGateway,
    jwt::TokenLifetimes,
    keys::KeyMaterial,
    registry::{MemoryRegistry, RefreshRegistry},
    rotation::DEFAULT_RENEWAL_WINDOW_SECS,
};
use std::sync::Arc;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub gateway: Arc<AuthGateway>,
}

/// A logged-in client: both cookies plus the CSRF secret from the login response.
#[derive(Debug, Clone)]
pub struct Session {
    pub uuid: String,
    pub access_token: String,
    pub refresh_token: String,
    pub csrf: String,
}

impl Session {
    pub fn cookies(&self) -> String {
        format!(
            "access_token={}; refresh_token={}",
            self.access_token, self.refresh_token
        )
    }
}

/// Builder for test apps with various options
pub struct TestSetup {
    no_signup: bool,
    memory_registry: bool,
    renewal_window_secs: u64,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            no_signup: false,
            memory_registry: false,
            renewal_window_secs: DEFAULT_RENEWAL_WINDOW_SECS,
        }
    }

    pub fn with_no_signup(mut self, no_signup: bool) -> Self {
        self.no_signup = no_signup;
        self
    }

    pub fn with_memory_registry(mut self) -> Self {
        self.memory_registry = true;
        self
    }

    pub fn with_renewal_window(mut self, secs: u64) -> Self {
        self.renewal_window_secs = secs;
        self
    }

    pub async fn build(self) -> TestApp {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");

        let registry: Arc<dyn RefreshRegistry> = if self.memory_registry {
            Arc::new(MemoryRegistry::new())
        } else {
            Arc::new(TokenStore::new(db.pool().clone()))
        };

        let settings = GatewaySettings {
            keys: KeyMaterial::generate().expect("Failed to generate keys"),
            verification_keys: Vec::new(),
            lifetimes: TokenLifetimes::default(),
            renewal_window_secs: self.renewal_window_secs,
        };
        let gateway = Arc::new(build_gateway(&settings, registry).expect("Failed to build gateway"));

        let config = ServerConfig {
            db: db.clone(),
            gateway: gateway.clone(),
            secure_cookies: false,
            no_signup: self.no_signup,
        };

        TestApp {
            app: create_app(&config),
            db,
            gateway,
        }
    }
}

pub async fn create_test_app() -> TestApp {
    TestSetup::new().build().await
}

/// Insert a user directly. Returns the UUID.
pub async fn create_user(db: &Database, username: &str, role: UserRole) -> String {
    let uuid = uuid::Uuid::new_v4().to_string();
    let hash = hash_password(PASSWORD).await.unwrap();
    db.users()
        .create(&uuid, username, &hash, role)
        .await
        .unwrap();
    uuid
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Request carrying the session's cookies and, if given, a CSRF header.
pub fn authed_request(method: &str, uri: &str, cookies: &str, csrf: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookies);
    if let Some(csrf) = csrf {
        builder = builder.header("X-CSRF-Token", csrf);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn login(app: &Router, username: &str) -> Session {
    let response = send(
        app,
        json_request(
            "POST",
            "/api/login",
            serde_json::json!({ "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(response.status(), 200, "login failed for {}", username);

    let access_token = set_cookie(&response, "access_token").expect("no access cookie");
    let refresh_token = set_cookie(&response, "refresh_token").expect("no refresh cookie");
    let json = body_json(response).await;

    Session {
        uuid: json["uuid"].as_str().unwrap().to_string(),
        access_token,
        refresh_token,
        csrf: json["csrf_token"].as_str().unwrap().to_string(),
    }
}

/// Value of a cookie set by the response, if any. Empty for a deletion.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&prefix))
        .last()
        .map(|v| v[prefix.len()..].split(';').next().unwrap_or("").to_string())
}

/// Full `Set-Cookie` header for a cookie, including attributes.
pub fn set_cookie_header(response: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(&prefix))
        .last()
        .map(String::from)
}

pub fn csrf_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
