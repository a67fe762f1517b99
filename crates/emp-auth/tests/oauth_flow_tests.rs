//! End-to-end tests for the OAuth 2.0 flows over HTTP.
//!
//! Drives the real axum router with an authenticated test user, so no
//! identity provider is involved.

mod common;

use std::sync::Arc;

use axum::http::{StatusCode, header};
use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::Barrier;

use common::*;
use emp_auth::jwt::{JwkSet, verify_access_token};

// =============================================================================
// Authorization code + refresh token
// =============================================================================

#[tokio::test]
async fn test_full_code_and_refresh_flow() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    // Authorize: auto-consent with the test user redirects straight back
    let response = get(&app, &authorize_uri(&client_id, "xyz")).await;
    let redirect = location(&response);
    assert!(redirect.starts_with("https://cb?"));
    let params = query_params(&redirect);
    assert_eq!(params["state"], "xyz");
    let code = params["code"].clone();

    // Exchange the code
    let response = redeem_code(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::PRAGMA], "no-cache");
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 3600);
    assert_eq!(tokens["scope"], "openid profile");
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();
    assert!(tokens["access_token"].as_str().is_some());

    // Replay the code
    let response = redeem_code(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "code was already used");

    // Rotate the refresh token
    let response = redeem_refresh(&app, &client_id, &refresh_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = body_json(response).await;
    let successor = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(successor, refresh_token);

    // The original refresh token is spent
    let response = redeem_refresh(&app, &client_id, &refresh_token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "refresh_token was already used");

    // The chain records its successor
    let record = server.stores().refresh_tokens.find(&refresh_token).await.unwrap().unwrap();
    assert_eq!(record.rotated_to.as_deref(), Some(successor.as_str()));

    // And the successor still works
    let response = redeem_refresh(&app, &client_id, &successor).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_chain_never_repeats_tokens() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let tokens = body_json(redeem_code(&app, &client_id, &code).await).await;
    let mut current = tokens["refresh_token"].as_str().unwrap().to_string();
    let mut seen = std::collections::HashSet::from([current.clone()]);

    for _ in 0..5 {
        let response = redeem_refresh(&app, &client_id, &current).await;
        assert_eq!(response.status(), StatusCode::OK);
        current = body_json(response).await["refresh_token"].as_str().unwrap().to_string();
        assert!(seen.insert(current.clone()), "refresh token reused");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_code_redemption_single_winner() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let barrier = Arc::new(Barrier::new(8));
    let attempts = (0..8).map(|_| {
        let app = app.clone();
        let client_id = client_id.clone();
        let code = code.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            redeem_code(&app, &client_id, &code).await.status()
        })
    });
    let statuses: Vec<StatusCode> =
        futures::future::join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::BAD_REQUEST).count(), 7);
}

#[tokio::test]
async fn test_expired_refresh_token_rejected() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;
    let tokens = body_json(redeem_code(&app, &client_id, &code).await).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let store = &server.stores().refresh_tokens;
    let mut record = store.find(refresh_token).await.unwrap().unwrap();
    record.expires_at = Utc::now() - Duration::seconds(1);
    store.save(record).await.unwrap();

    let response = redeem_refresh(&app, &client_id, refresh_token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "refresh_token has expired");
    assert!(store.find(refresh_token).await.unwrap().unwrap().used_at.is_none());
}

// =============================================================================
// Token endpoint errors
// =============================================================================

#[tokio::test]
async fn test_token_rejects_wrong_verifier_without_burning_code() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let response = post_form(
        &app,
        "/oauth/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", CALLBACK),
            ("client_id", &client_id),
            ("code_verifier", "not-the-verifier"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "code_verifier is invalid");

    assert_eq!(redeem_code(&app, &client_id, &code).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_rejects_mismatched_client_and_redirect() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let other_client = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let error = body_json(redeem_code(&app, &other_client, &code).await).await;
    assert_eq!(error["error_description"], "client_id does not match");

    let response = post_form(
        &app,
        "/oauth/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("client_id", &client_id),
            ("code_verifier", VERIFIER),
        ],
    )
    .await;
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "redirect_uri does not match");
}

#[tokio::test]
async fn test_token_rejects_expired_code() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let mut record = server.stores().auth_codes.find(&code).await.unwrap().unwrap();
    record.expires_at = Utc::now() - Duration::seconds(1);
    server.stores().auth_codes.save(record).await.unwrap();

    let error = body_json(redeem_code(&app, &client_id, &code).await).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "code has expired");
}

#[tokio::test]
async fn test_token_grant_type_errors() {
    let server = build_server(test_config());
    let app = router(&server);

    let response = post_form(&app, "/oauth/token", &[("grant_type", "password")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");

    let response = post_form(&app, "/oauth/token", &[("grant_type", "")]).await;
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_request");
    assert_eq!(error["error_description"], "grant_type is required");

    let params = [("grant_type", "refresh_token"), ("client_id", "c")];
    let response = post_form(&app, "/oauth/token", &params).await;
    assert_eq!(body_json(response).await["error_description"], "refresh_token is required");

    let response = redeem_refresh(&app, "c", "unknown").await;
    let error = body_json(response).await;
    assert_eq!(error["error"], "invalid_grant");
    assert_eq!(error["error_description"], "refresh_token is invalid");
}

#[tokio::test]
async fn test_missing_resource_keeps_code_redeemable() {
    let mut config = test_config();
    config.default_resource = None;
    let server = build_server(config);
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let response = redeem_code(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "resource is required");

    let stored = server.stores().auth_codes.find(&code).await.unwrap().unwrap();
    assert!(stored.used_at.is_none());
}

// =============================================================================
// Authorization endpoint errors
// =============================================================================

#[tokio::test]
async fn test_authorize_errors_before_redirect_confirmation_are_json() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    let response = get(&app, "/oauth/authorize?response_type=token&client_id=x").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_response_type");

    let response = get(&app, "/oauth/authorize?response_type=code").await;
    assert_eq!(body_json(response).await["error_description"], "client_id is required");

    let uri = format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}",
        encode(&client_id),
        encode("https://evil.example.com/cb")
    );
    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "redirect_uri is not registered");
}

#[tokio::test]
async fn test_authorize_pkce_errors_redirect_to_client() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    let uri = format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&state=s1",
        encode(&client_id),
        encode(CALLBACK)
    );
    let params = query_params(&location(&get(&app, &uri).await));
    assert_eq!(params["error"], "invalid_request");
    assert_eq!(params["error_description"], "code_challenge is required");
    assert_eq!(params["state"], "s1");

    let uri = format!("{uri}&code_challenge=abc&code_challenge_method=plain");
    let params = query_params(&location(&get(&app, &uri).await));
    assert_eq!(params["error_description"], "code_challenge_method must be S256");
}

#[tokio::test]
async fn test_authorize_without_user_hands_off_to_google_login() {
    let mut config = test_config();
    config.test_user_id = None;
    let server = build_server(config);
    let app = router(&server);
    let client_id = register_client(&app).await;

    let login_uri = location(&get(&app, &authorize_uri(&client_id, "xyz")).await);
    assert!(login_uri.starts_with("/oauth/google/login?state="));
    let request_id = query_params(&login_uri)["state"].clone();

    let pending = server.stores().auth_requests.find(&request_id).await.unwrap().unwrap();
    assert_eq!(pending.client_id, client_id);
    assert_eq!(pending.original_state.as_deref(), Some("xyz"));
    assert!(pending.user_id.is_none());

    let client = server.stores().clients.find(&client_id).await.unwrap().unwrap();
    assert!(client.last_used_at.is_some());
}

// =============================================================================
// Consent
// =============================================================================

fn consent_config() -> emp_auth::Config {
    let mut config = test_config();
    config.auto_consent = false;
    config
}

#[tokio::test]
async fn test_consent_approve_issues_code() {
    let server = build_server(consent_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    let consent_uri = location(&get(&app, &authorize_uri(&client_id, "xyz")).await);
    assert!(consent_uri.starts_with("/oauth/consent?state="));
    let request_id = query_params(&consent_uri)["state"].clone();

    let response = get(&app, &consent_uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(&client_id));
    assert!(html.contains("openid profile"));

    let response = post_consent(&app, &request_id, "approve").await;
    let params = query_params(&location(&response));
    assert_eq!(params["state"], "xyz");
    assert!(server.stores().auth_requests.find(&request_id).await.unwrap().is_none());

    assert_eq!(redeem_code(&app, &client_id, &params["code"]).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_consent_deny_redirects_access_denied() {
    let server = build_server(consent_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    let consent_uri = location(&get(&app, &authorize_uri(&client_id, "xyz")).await);
    let request_id = query_params(&consent_uri)["state"].clone();

    let response = post_consent(&app, &request_id, "deny").await;
    let redirect = location(&response);
    assert!(redirect.starts_with("https://cb?"));
    let params = query_params(&redirect);
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["error_description"], "consent denied");
    assert_eq!(params["state"], "xyz");

    let response = get(&app, &format!("/oauth/consent?state={}", encode(&request_id))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "authorization request expired");
}

#[tokio::test]
async fn test_consent_rejects_expired_request() {
    let server = build_server(consent_config());
    let app = router(&server);
    let client_id = register_client(&app).await;

    let consent_uri = location(&get(&app, &authorize_uri(&client_id, "xyz")).await);
    let request_id = query_params(&consent_uri)["state"].clone();
    expire_pending_request(&server, &request_id).await;

    let response = get(&app, &consent_uri).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "authorization request expired");

    let response = post_consent(&app, &request_id, "approve").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "authorization request expired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_issue_one_code() {
    let dir = tempfile::TempDir::new().unwrap();
    let stores = emp_auth::Stores::durable(dir.path().join("db")).unwrap();
    let server = build_server_with_stores(consent_config(), stores);
    let app = router(&server);
    let client_id = register_client(&app).await;

    for _ in 0..10 {
        let consent_uri = location(&get(&app, &authorize_uri(&client_id, "xyz")).await);
        let request_id = query_params(&consent_uri)["state"].clone();

        let barrier = Arc::new(Barrier::new(4));
        let approvals = (0..4).map(|_| {
            let app = app.clone();
            let request_id = request_id.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                post_consent(&app, &request_id, "approve").await
            })
        });

        let mut codes = 0;
        for response in futures::future::join_all(approvals).await {
            let response = response.unwrap();
            if response.status() == StatusCode::SEE_OTHER {
                assert!(query_params(&location(&response)).contains_key("code"));
                codes += 1;
            } else {
                assert_eq!(response.status(), StatusCode::BAD_REQUEST);
                let body = body_json(response).await;
                assert_eq!(body["error_description"], "authorization request expired");
            }
        }
        assert_eq!(codes, 1);
    }
}

#[tokio::test]
async fn test_consent_requires_state() {
    let server = build_server(consent_config());
    let app = router(&server);

    let response = get(&app, "/oauth/consent").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "state is required");
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_public_client() {
    let server = build_server(test_config());
    let app = router(&server);

    let response = post_json(
        &app,
        "/oauth/register",
        &json!({
            "redirect_uris": ["https://cb", " "],
            "client_name": "Desktop",
            "token_endpoint_auth_method": "client_secret_basic",
            "scope": "openid"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["redirect_uris"], json!(["https://cb"]));
    assert_eq!(body["token_endpoint_auth_method"], "none");
    assert_eq!(body["client_name"], "Desktop");
    assert_eq!(body["scope"], "openid");
    assert!(body["client_id_issued_at"].as_i64().unwrap() > 0);

    let client_id = body["client_id"].as_str().unwrap();
    assert!(server.stores().clients.find(client_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_register_rejects_bad_metadata() {
    let server = build_server(test_config());
    let app = router(&server);

    let response = post_json(&app, "/oauth/register", &json!({"redirect_uris": []})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_description"], "redirect_uris is required");

    let response = post_json(
        &app,
        "/oauth/register",
        &json!({"redirect_uris": ["https://cb"], "token_endpoint_auth_method": "private_key_jwt"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_client_metadata");
}

// =============================================================================
// Access tokens and JWKS
// =============================================================================

#[tokio::test]
async fn test_access_token_verifies_against_published_jwks() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;
    let tokens = body_json(redeem_code(&app, &client_id, &code).await).await;
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = get(&app, "/jwks.json").await;
    assert_eq!(response.status(), StatusCode::OK);
    let jwks: JwkSet = serde_json::from_value(body_json(response).await).unwrap();
    let jwk = jwks.find("es256-1").unwrap();
    assert_eq!(jwk.alg, "ES256");

    let claims = verify_access_token(access_token, jwk).unwrap();
    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.sub, TEST_USER);
    assert_eq!(claims.aud, RESOURCE);
    assert_eq!(claims.client_id, client_id);
    assert_eq!(claims.email.as_deref(), Some(TEST_USER));
    assert_eq!(claims.scope.as_deref(), Some("openid profile"));
    assert_eq!(claims.exp - claims.iat, 3600);

    // Flip one character of the payload
    let parts: Vec<&str> = access_token.split('.').collect();
    let mut payload: Vec<char> = parts[1].chars().collect();
    payload[5] = if payload[5] == 'A' { 'B' } else { 'A' };
    let payload: String = payload.into_iter().collect();
    let tampered = format!("{}.{}.{}", parts[0], payload, parts[2]);
    assert!(verify_access_token(&tampered, jwk).is_err());
}

#[tokio::test]
async fn test_jwks_unavailable_without_key_material() {
    let mut config = test_config();
    config.key_source = None;
    let server = Arc::new(emp_auth::AuthorizationServer::new(config).unwrap());
    let app = router(&server);

    let response = get(&app, "/jwks.json").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "jwks_unavailable");

    // Token issuance fails hard and leaves the code unclaimed
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;
    let response = redeem_code(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "temporarily_unavailable");
    assert!(server.stores().auth_codes.find(&code).await.unwrap().unwrap().used_at.is_none());
}

// =============================================================================
// Discovery, health and cleanup
// =============================================================================

#[tokio::test]
async fn test_metadata_documents() {
    let server = build_server(test_config());
    let app = router(&server);

    let response = get(&app, "/.well-known/oauth-authorization-server").await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["issuer"], ISSUER);
    assert_eq!(metadata["authorization_endpoint"], "https://auth.example.com/oauth/authorize");
    assert_eq!(metadata["jwks_uri"], "https://auth.example.com/jwks.json");
    assert_eq!(metadata["code_challenge_methods_supported"], json!(["S256"]));

    let response = get(&app, "/.well-known/openid-configuration").await;
    let openid = body_json(response).await;
    assert_eq!(openid["token_endpoint"], "https://auth.example.com/oauth/token");
    assert_eq!(openid["subject_types_supported"], json!(["public"]));
}

#[tokio::test]
async fn test_health() {
    let server = build_server(test_config());
    let response = get(&router(&server), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_cleanup_endpoint_is_idempotent() {
    let server = build_server(test_config());
    let app = router(&server);
    let client_id = register_client(&app).await;
    let code = obtain_code(&app, &client_id).await;
    let tokens = body_json(redeem_code(&app, &client_id, &code).await).await;
    redeem_refresh(&app, &client_id, tokens["refresh_token"].as_str().unwrap()).await;

    let response = post_form(&app, "/oauth/cleanup", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["authCodesDeleted"], 1);
    assert_eq!(report["refreshTokensDeleted"], 1);
    assert_eq!(report["clientsDeleted"], 0);

    let report = body_json(post_form(&app, "/oauth/cleanup", &[]).await).await;
    assert_eq!(report, json!({
        "authRequestsDeleted": 0,
        "authCodesDeleted": 0,
        "refreshTokensDeleted": 0,
        "clientsDeleted": 0
    }));
}
