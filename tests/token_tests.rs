//! Tests for silent rotation, CSRF binding and session management.
//!
//! Tests cover:
//! - Expired access token + valid refresh token rotates transparently
//! - Every rotation hands out a fresh CSRF secret
//! - Rotation without an access token only grants safe methods
//! - Refresh token renewal near expiry
//! - Forged tokens
//! - Listing and revoking sessions

mod common;

use axum::http::StatusCode;
use common::{
    TestApp, TestSetup, authed_request, body_json, create_test_app, create_user, csrf_header,
    login, send, set_cookie,
};
use sentinel::db::UserRole;
use sentinel::jwt::{AccessTokenResult, REFRESH_TOKEN_DURATION_SECS, TokenLifetimes, unix_now};
use sentinel::keys::KeyMaterial;

/// Access token for `uuid` issued two hours ago, long expired.
fn expired_access(t: &TestApp, uuid: &str) -> AccessTokenResult {
    let now = unix_now().unwrap();
    t.gateway
        .codec()
        .issue_access_at(uuid, UserRole::User, now - 7200)
        .unwrap()
}

fn cookies(access: &str, refresh: &str) -> String {
    format!("access_token={}; refresh_token={}", access, refresh)
}

#[tokio::test]
async fn test_expired_access_rotates_with_fresh_csrf() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &cookies(&expired.token, &session.refresh_token),
            Some(&expired.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let new_access = set_cookie(&response, "access_token").expect("no rotated access cookie");
    let new_csrf = csrf_header(&response).expect("no rotated CSRF header");
    assert_ne!(new_csrf, expired.csrf_secret);
    assert_ne!(new_csrf, session.csrf);
    // A fresh refresh token is far from expiry, so it is kept.
    assert!(set_cookie(&response, "refresh_token").is_none());
    assert_eq!(body_json(response).await["rotated"], true);

    let claims = t.gateway.codec().verify_access(&new_access).unwrap();
    assert_eq!(claims.csrf, new_csrf);
    assert_eq!(claims.sub, session.uuid);

    // The rotated pair works; the old CSRF secret does not.
    let response = send(
        &t.app,
        authed_request(
            "POST",
            "/api/logout",
            &cookies(&new_access, &session.refresh_token),
            Some(&expired.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &cookies(&new_access, &session.refresh_token),
            Some(&new_csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_access_still_needs_csrf() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &cookies(&expired.token, &session.refresh_token),
            Some(&session.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookie(&response, "access_token").is_none());
}

#[tokio::test]
async fn test_expired_access_without_refresh() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &format!("access_token={}", expired.token),
            Some(&expired.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(set_cookie(&response, "access_token").as_deref(), Some(""));
    let json = body_json(response).await;
    assert_eq!(json["reason"], "expired-no-refresh");
}

#[tokio::test]
async fn test_lost_access_rotation_grants_safe_methods_only() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let refresh_only = format!("refresh_token={}", session.refresh_token);

    let response = send(
        &t.app,
        authed_request("GET", "/api/restricted", &refresh_only, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response, "access_token").is_some());
    assert!(csrf_header(&response).is_some());

    // A state-changing request is refused but still receives usable credentials.
    let response = send(
        &t.app,
        authed_request("POST", "/api/logout-all", &refresh_only, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let new_access = set_cookie(&response, "access_token").expect("no rotated access cookie");
    let new_csrf = csrf_header(&response).expect("no rotated CSRF header");
    let json = body_json(response).await;
    assert_eq!(json["reason"], "csrf-mismatch");

    let jti = t
        .gateway
        .codec()
        .verify_refresh(&session.refresh_token)
        .unwrap()
        .jti;
    assert!(t.gateway.registry().lookup(&jti).await.unwrap().is_some());

    // Retrying with the handed-out pair succeeds.
    let response = send(
        &t.app,
        authed_request(
            "POST",
            "/api/logout-all",
            &cookies(&new_access, &session.refresh_token),
            Some(&new_csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(t.gateway.registry().lookup(&jti).await.unwrap().is_none());
}

#[tokio::test]
async fn test_lost_access_rotation_refuses_account_deletion() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;

    // A refresh cookie alone, as a cross-site request would carry it.
    let response = send(
        &t.app,
        authed_request(
            "DELETE",
            &format!("/api/users/{}", session.uuid),
            &format!("refresh_token={}", session.refresh_token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // A CSRF refusal never clears the session.
    assert!(set_cookie(&response, "refresh_token").is_none());
    let json = body_json(response).await;
    assert_eq!(json["reason"], "csrf-mismatch");

    assert!(t.db.users().get_by_uuid(&session.uuid).await.unwrap().is_some());
}

#[tokio::test]
async fn test_refresh_renewed_near_expiry() {
    // A window as long as the refresh lifetime renews on every rotation.
    let t = TestSetup::new()
        .with_renewal_window(REFRESH_TOKEN_DURATION_SECS)
        .build()
        .await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let old_jti = t
        .gateway
        .codec()
        .verify_refresh(&session.refresh_token)
        .unwrap()
        .jti;
    let expired = expired_access(&t, &session.uuid);

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &cookies(&expired.token, &session.refresh_token),
            Some(&expired.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let new_refresh = set_cookie(&response, "refresh_token").expect("no renewed refresh cookie");
    let new_jti = t.gateway.codec().verify_refresh(&new_refresh).unwrap().jti;
    assert_ne!(new_jti, old_jti);

    let registry = t.gateway.registry();
    assert!(registry.lookup(&old_jti).await.unwrap().is_none());
    assert!(registry.lookup(&new_jti).await.unwrap().is_some());

    // The superseded refresh token is dead.
    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &format!("refresh_token={}", session.refresh_token),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_during_renewal_leaves_nothing_behind() {
    let t = TestSetup::new()
        .with_renewal_window(REFRESH_TOKEN_DURATION_SECS)
        .build()
        .await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);

    let response = send(
        &t.app,
        authed_request(
            "POST",
            "/api/logout",
            &cookies(&expired.token, &session.refresh_token),
            Some(&expired.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    // Only deletions reach the client.
    assert_eq!(set_cookie(&response, "access_token").as_deref(), Some(""));
    assert_eq!(set_cookie(&response, "refresh_token").as_deref(), Some(""));
    assert!(csrf_header(&response).is_none());

    let now = unix_now().unwrap();
    let remaining = t.gateway.registry().list(&session.uuid, now).await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_concurrent_rotations_all_succeed() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);
    let cookie = cookies(&expired.token, &session.refresh_token);

    let responses = futures::future::join_all((0..10).map(|_| {
        send(
            &t.app,
            authed_request("GET", "/api/restricted", &cookie, Some(&expired.csrf_secret)),
        )
    }))
    .await;

    let mut secrets = std::collections::HashSet::new();
    for response in &responses {
        assert_eq!(response.status(), StatusCode::OK);
        secrets.insert(csrf_header(response).unwrap());
    }
    assert_eq!(secrets.len(), 10);
}

#[tokio::test]
async fn test_concurrent_renewals_keep_one_session() {
    let t = TestSetup::new()
        .with_renewal_window(REFRESH_TOKEN_DURATION_SECS)
        .build()
        .await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;
    let expired = expired_access(&t, &session.uuid);
    let cookie = cookies(&expired.token, &session.refresh_token);

    let responses = futures::future::join_all((0..5).map(|_| {
        send(
            &t.app,
            authed_request("GET", "/api/restricted", &cookie, Some(&expired.csrf_secret)),
        )
    }))
    .await;

    let renewed = responses
        .iter()
        .filter(|r| r.status() == StatusCode::OK)
        .count();
    assert_eq!(renewed, 1);

    // Only the single renewed refresh token is registered.
    let now = unix_now().unwrap();
    let live = t.gateway.registry().list(&session.uuid, now).await.unwrap();
    assert_eq!(live.len(), 1);
}

#[tokio::test]
async fn test_tampered_access_token_rejected() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let session = login(&t.app, "alice").await;

    // Swap in another token's payload under the original signature.
    let other = t
        .gateway
        .codec()
        .issue_access(&session.uuid, UserRole::Admin)
        .unwrap();
    let mut parts: Vec<&str> = session.access_token.split('.').collect();
    let other_parts: Vec<&str> = other.token.split('.').collect();
    parts[1] = other_parts[1];
    let tampered = parts.join(".");

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &cookies(&tampered, &session.refresh_token),
            Some(&other.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(set_cookie(&response, "access_token").as_deref(), Some(""));
    let json = body_json(response).await;
    assert_eq!(json["reason"], "invalid-signature");
}

#[tokio::test]
async fn test_token_from_foreign_key_rejected() {
    let t = create_test_app().await;
    let uuid = create_user(&t.db, "alice", UserRole::User).await;

    let foreign = sentinel::jwt::TokenCodec::new(
        &KeyMaterial::generate().unwrap(),
        TokenLifetimes::default(),
    )
    .unwrap();
    let access = foreign.issue_access(&uuid, UserRole::Admin).unwrap();

    let response = send(
        &t.app,
        authed_request(
            "GET",
            "/api/restricted",
            &format!("access_token={}", access.token),
            Some(&access.csrf_secret),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["reason"], "invalid-signature");
}

#[tokio::test]
async fn test_list_tokens() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    create_user(&t.db, "bob", UserRole::User).await;
    let laptop = login(&t.app, "alice").await;
    let _phone = login(&t.app, "alice").await;
    let _bob = login(&t.app, "bob").await;

    let response = send(
        &t.app,
        authed_request("GET", "/api/tokens", &laptop.cookies(), Some(&laptop.csrf)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let tokens = json["tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 2);

    let laptop_jti = t
        .gateway
        .codec()
        .verify_refresh(&laptop.refresh_token)
        .unwrap()
        .jti;
    let current: Vec<_> = tokens
        .iter()
        .filter(|token| token["is_current"].as_bool() == Some(true))
        .collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["jti"], laptop_jti);
}

#[tokio::test]
async fn test_revoke_own_token() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    let laptop = login(&t.app, "alice").await;
    let phone = login(&t.app, "alice").await;
    let phone_jti = t
        .gateway
        .codec()
        .verify_refresh(&phone.refresh_token)
        .unwrap()
        .jti;

    let response = send(
        &t.app,
        authed_request(
            "DELETE",
            &format!("/api/tokens/{}", phone_jti),
            &laptop.cookies(),
            Some(&laptop.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["revoked"], true);

    // Revoking again is a no-op.
    let response = send(
        &t.app,
        authed_request(
            "DELETE",
            &format!("/api/tokens/{}", phone_jti),
            &laptop.cookies(),
            Some(&laptop.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["revoked"], false);
}

#[tokio::test]
async fn test_cannot_revoke_other_users_token() {
    let t = create_test_app().await;
    create_user(&t.db, "alice", UserRole::User).await;
    create_user(&t.db, "bob", UserRole::User).await;
    let alice = login(&t.app, "alice").await;
    let bob = login(&t.app, "bob").await;
    let bob_jti = t
        .gateway
        .codec()
        .verify_refresh(&bob.refresh_token)
        .unwrap()
        .jti;

    let response = send(
        &t.app,
        authed_request(
            "DELETE",
            &format!("/api/tokens/{}", bob_jti),
            &alice.cookies(),
            Some(&alice.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.gateway.registry().lookup(&bob_jti).await.unwrap().is_some());
}

#[tokio::test]
async fn test_admin_can_revoke_any_token() {
    let t = create_test_app().await;
    create_user(&t.db, "root", UserRole::Admin).await;
    create_user(&t.db, "bob", UserRole::User).await;
    let admin = login(&t.app, "root").await;
    let bob = login(&t.app, "bob").await;
    let bob_jti = t
        .gateway
        .codec()
        .verify_refresh(&bob.refresh_token)
        .unwrap()
        .jti;

    let response = send(
        &t.app,
        authed_request(
            "DELETE",
            &format!("/api/tokens/{}", bob_jti),
            &admin.cookies(),
            Some(&admin.csrf),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(t.gateway.registry().lookup(&bob_jti).await.unwrap().is_none());
}
