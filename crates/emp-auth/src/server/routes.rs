//! HTTP routes of the authorization server.
//!
//! Handlers are thin: they parse parameters, call into
//! [`AuthorizationServer`](crate::oauth::AuthorizationServer) with the current
//! time, and translate the outcome into a response.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::consent_page::render_consent_page;
use super::metadata::{AuthorizationServerMetadata, OpenIdConfiguration};
use crate::error::{ErrorCode, OAuthError};
use crate::oauth::{
    AuthorizationServer, AuthorizeRequest, ConsentDecision, GoogleCallback, RedirectTo,
    RegisterRequest, TokenRequest, TokenResponse, with_query,
};

type AppState = Arc<AuthorizationServer>;

/// `?state=` of the consent page and the login handoff.
#[derive(Debug, Default, Deserialize)]
struct StateQuery {
    state: Option<String>,
}

/// Create the router with every endpoint of the server.
pub fn create_router(server: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/oauth-authorization-server", get(handle_auth_server_metadata))
        .route("/.well-known/openid-configuration", get(handle_openid_configuration))
        .route("/jwks.json", get(handle_jwks))
        .route("/oauth/authorize", get(handle_authorize))
        .route("/oauth/token", post(handle_token))
        .route("/oauth/register", post(handle_register))
        .route("/oauth/consent", get(handle_consent_page).post(handle_consent_decision))
        .route("/oauth/google/login", get(handle_google_login))
        .route("/oauth/google/callback", get(handle_google_callback))
        .route("/oauth/cleanup", post(handle_cleanup))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "emp-auth",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ─── Discovery ───────────────────────────────────────────────────────────────

async fn handle_auth_server_metadata(State(server): State<AppState>) -> impl IntoResponse {
    Json(AuthorizationServerMetadata::from_config(server.config()))
}

async fn handle_openid_configuration(State(server): State<AppState>) -> impl IntoResponse {
    Json(OpenIdConfiguration::from_config(server.config()))
}

/// `GET /jwks.json`
async fn handle_jwks(State(server): State<AppState>) -> Response {
    match server.signer().jwks().await {
        Ok(jwks) => Json(jwks).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Unable to publish JWKS");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "jwks_unavailable",
                    "error_description": err.to_string()
                })),
            )
                .into_response()
        }
    }
}

// ─── Authorization ───────────────────────────────────────────────────────────

/// `GET /oauth/authorize`
///
/// The authenticated user is the configured test user, when set; otherwise
/// the request is handed to Google sign-in.
async fn handle_authorize(
    State(server): State<AppState>,
    Query(request): Query<AuthorizeRequest>,
) -> Result<RedirectTo, OAuthError> {
    let user = server.config().test_user_id.clone();
    server.authorize(&request, user.as_deref(), Utc::now()).await
}

/// `GET /oauth/consent`
async fn handle_consent_page(
    State(server): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Html<String>, OAuthError> {
    let view = server.consent_view(query.state.as_deref(), Utc::now()).await?;
    Ok(Html(render_consent_page(&view)))
}

/// `POST /oauth/consent`
async fn handle_consent_decision(
    State(server): State<AppState>,
    Form(decision): Form<ConsentDecision>,
) -> Result<RedirectTo, OAuthError> {
    server.complete_consent(&decision, Utc::now()).await
}

/// `GET /oauth/google/login`
async fn handle_google_login(
    State(server): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<RedirectTo, OAuthError> {
    server.begin_federated_login(query.state.as_deref(), Utc::now()).await
}

/// `GET /oauth/google/callback`
async fn handle_google_callback(
    State(server): State<AppState>,
    Query(callback): Query<GoogleCallback>,
) -> Result<RedirectTo, OAuthError> {
    server.complete_federated_login(&callback, Utc::now()).await
}

// ─── Token ───────────────────────────────────────────────────────────────────

/// `POST /oauth/token`
async fn handle_token(
    State(server): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Response, OAuthError> {
    let tokens = server.token(&request, Utc::now()).await?;
    Ok(token_success(&tokens))
}

fn token_success(tokens: &TokenResponse) -> Response {
    let mut response = Json(tokens).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

// ─── Registration and maintenance ────────────────────────────────────────────

/// `POST /oauth/register`
async fn handle_register(
    State(server): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, OAuthError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected registration body");
        OAuthError::request(ErrorCode::InvalidClientMetadata, "request body must be a JSON object")
    })?;
    let registered = server.register(&request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(registered)).into_response())
}

/// `POST /oauth/cleanup`
async fn handle_cleanup(State(server): State<AppState>) -> Result<Response, OAuthError> {
    let report = server.sweeper().sweep(Utc::now()).await?;
    Ok(Json(report).into_response())
}

// ─── Response mapping ────────────────────────────────────────────────────────

impl IntoResponse for RedirectTo {
    fn into_response(self) -> Response {
        Redirect::to(&self.location).into_response()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let code = self.code();
        let description = self.description().into_owned();

        let status = match &self {
            Self::Redirect { redirect_uri, state, .. } => {
                tracing::info!(
                    error = %code,
                    description = %description,
                    "Redirecting with OAuth error"
                );
                let mut params = vec![
                    ("error", code.as_str()),
                    ("error_description", description.as_str()),
                ];
                if let Some(state) = state {
                    params.push(("state", state.as_str()));
                }
                return Redirect::to(&with_query(redirect_uri, &params)).into_response();
            }
            Self::Request { .. } => {
                tracing::debug!(
                    error = %code,
                    description = %description,
                    "Rejected OAuth request"
                );
                StatusCode::BAD_REQUEST
            }
            Self::KeyMaterial(_) | Self::Identity(_) => {
                tracing::error!(error = %self, "Dependency unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Store(_) => {
                tracing::error!(error = %self, "Store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": code.as_str(),
                "error_description": description
            })),
        )
            .into_response()
    }
}
