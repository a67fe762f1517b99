//! Shared fixtures for the HTTP-level tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use chrono::{Duration, Utc};
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt;

use emp_auth::keys::{KeyPair, KeyMaterialProvider, StaticKeyProvider};
use emp_auth::pkce::s256_challenge;
use emp_auth::server::create_router;
use emp_auth::{AuthorizationServer, Config, Stores};

pub const ISSUER: &str = "https://auth.example.com";
pub const CALLBACK: &str = "https://cb";
pub const RESOURCE: &str = "https://api.example.com";
pub const TEST_USER: &str = "alice@example.com";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

pub fn signing_keys() -> Arc<dyn KeyMaterialProvider> {
    Arc::new(StaticKeyProvider::new(KeyPair::from_signing_key(SigningKey::random(&mut OsRng))))
}

/// Config with an authenticated test user and auto-consent on.
pub fn test_config() -> Config {
    let mut config = Config::for_testing(ISSUER);
    config.test_user_id = Some(TEST_USER.to_string());
    config.default_resource = Some(RESOURCE.to_string());
    config
}

pub fn build_server(config: Config) -> Arc<AuthorizationServer> {
    build_server_with_stores(config, Stores::in_memory())
}

pub fn build_server_with_stores(config: Config, stores: Stores) -> Arc<AuthorizationServer> {
    Arc::new(AuthorizationServer::with_parts(config, stores, signing_keys()).unwrap())
}

pub fn router(server: &Arc<AuthorizationServer>) -> Router {
    create_router(Arc::clone(server))
}

/// Push a pending request's expiry into the past without removing it.
pub async fn expire_pending_request(server: &AuthorizationServer, request_id: &str) {
    let requests = &server.stores().auth_requests;
    let mut pending = requests.find(request_id).await.unwrap().unwrap();
    pending.expires_at = Utc::now() - Duration::seconds(1);
    requests.save(pending).await.unwrap();
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone().oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap()
}

pub async fn post_form(app: &Router, uri: &str, params: &[(&str, &str)]) -> Response {
    let body = serde_urlencoded::to_string(params).unwrap();
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: &Value) -> Response {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// The `Location` of a 303 response.
pub fn location(response: &Response) -> String {
    assert_eq!(response.status(), StatusCode::SEE_OTHER, "expected a redirect");
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

/// Query parameters of an absolute or relative URI.
pub fn query_params(uri: &str) -> HashMap<String, String> {
    let absolute = if uri.starts_with('/') {
        format!("http://local{uri}")
    } else {
        uri.to_string()
    };
    url::Url::parse(&absolute).unwrap().query_pairs().into_owned().collect()
}

pub fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub async fn register_client(app: &Router) -> String {
    let metadata = json!({"redirect_uris": [CALLBACK], "client_name": "Test"});
    let response = post_json(app, "/oauth/register", &metadata).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["client_id"].as_str().unwrap().to_string()
}

pub fn authorize_uri(client_id: &str, state: &str) -> String {
    format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        encode(client_id),
        encode(CALLBACK),
        encode("openid profile"),
        encode(state),
        s256_challenge(VERIFIER),
    )
}

/// Run the authorize step and return the issued code.
pub async fn obtain_code(app: &Router, client_id: &str) -> String {
    let response = get(app, &authorize_uri(client_id, "xyz")).await;
    query_params(&location(&response))["code"].clone()
}

pub async fn redeem_code(app: &Router, client_id: &str, code: &str) -> Response {
    post_form(
        app,
        "/oauth/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", CALLBACK),
            ("client_id", client_id),
            ("code_verifier", VERIFIER),
        ],
    )
    .await
}

/// Post a consent decision for a pending request.
pub async fn post_consent(app: &Router, request_id: &str, decision: &str) -> Response {
    post_form(app, "/oauth/consent", &[("state", request_id), ("decision", decision)]).await
}

pub async fn redeem_refresh(app: &Router, client_id: &str, refresh_token: &str) -> Response {
    post_form(
        app,
        "/oauth/token",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ],
    )
    .await
}
