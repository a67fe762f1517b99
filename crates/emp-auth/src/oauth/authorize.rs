//! Authorization endpoint, consent step and Google login handoff.
//!
//! A request moves `REQUESTED -> {AWAITING_LOGIN | AWAITING_CONSENT | ISSUED}`.
//! Pending requests are keyed by a random id that travels as `state` through
//! the login and consent steps. A refused request is removed; an approved one
//! is removed before its code is issued, so it yields at most one code.

use chrono::{DateTime, Utc};

use super::issue::{REQUEST_ID_BYTES, random_token};
use super::{AuthorizationServer, AuthorizeRequest, ConsentDecision, GoogleCallback, RedirectTo};
use super::{non_blank, with_query};
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::models::{AuthRequestRecord, PKCE_METHOD_S256};
use crate::pkce;

const GOOGLE_LOGIN_PATH: &str = "/oauth/google/login";
const CONSENT_PATH: &str = "/oauth/consent";

/// What the consent page shows for a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentView {
    pub brand_name: String,
    pub state: String,
    pub client_id: String,
    pub scope: Option<String>,
    pub resource: Option<String>,
}

impl AuthorizationServer {
    /// Handle `GET /oauth/authorize`.
    ///
    /// `user` is the already-authenticated user, if any. Errors found before the
    /// redirect URI is confirmed are returned to the caller; later ones go to
    /// the redirect URI.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        user: Option<&str>,
        now: DateTime<Utc>,
    ) -> OAuthResult<RedirectTo> {
        if non_blank(request.response_type.as_ref()) != Some("code") {
            return Err(OAuthError::request(
                ErrorCode::UnsupportedResponseType,
                "response_type must be code",
            ));
        }
        let client_id = non_blank(request.client_id.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;
        let redirect_uri = non_blank(request.redirect_uri.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
        if !self.stores.clients.is_redirect_uri_allowed(client_id, redirect_uri).await? {
            return Err(OAuthError::invalid_request("redirect_uri is not registered"));
        }

        let state = non_blank(request.state.as_ref());
        let Some(code_challenge) = non_blank(request.code_challenge.as_ref()) else {
            return Err(OAuthError::redirect(
                redirect_uri,
                ErrorCode::InvalidRequest,
                "code_challenge is required",
                state,
            ));
        };
        if !pkce::is_supported_method(non_blank(request.code_challenge_method.as_ref())) {
            return Err(OAuthError::redirect(
                redirect_uri,
                ErrorCode::InvalidRequest,
                "code_challenge_method must be S256",
                state,
            ));
        }

        self.stores.clients.update_last_used_at(client_id, now).await?;

        let mut pending = AuthRequestRecord {
            id: random_token(REQUEST_ID_BYTES),
            client_id: client_id.to_owned(),
            redirect_uri: redirect_uri.to_owned(),
            scope: non_blank(request.scope.as_ref()).map(str::to_owned),
            resource: non_blank(request.resource.as_ref()).map(str::to_owned),
            code_challenge: code_challenge.to_owned(),
            code_challenge_method: PKCE_METHOD_S256.to_owned(),
            original_state: state.map(str::to_owned),
            user_id: None,
            expires_at: self.auth_request_expiry(now),
        };

        let Some(user) = user.filter(|u| !u.trim().is_empty()) else {
            self.stores.auth_requests.save(pending.clone()).await?;
            tracing::info!(client_id, "Authorization awaiting federated login");
            return Ok(RedirectTo::new(with_query(
                GOOGLE_LOGIN_PATH,
                &[("state", pending.id.as_str())],
            )));
        };

        if !self.config.auto_consent {
            pending.user_id = Some(user.to_owned());
            self.stores.auth_requests.save(pending.clone()).await?;
            tracing::info!(client_id, "Authorization awaiting consent");
            return Ok(RedirectTo::new(with_query(
                CONSENT_PATH,
                &[("state", pending.id.as_str())],
            )));
        }

        let code = self.issue_code(&pending, user, now).await?;
        tracing::info!(client_id, "Auto-approved authorization");
        Ok(code_redirect(&pending, &code))
    }

    /// Data for the consent page of a pending request.
    pub async fn consent_view(
        &self,
        state: Option<&str>,
        now: DateTime<Utc>,
    ) -> OAuthResult<ConsentView> {
        let pending = self.load_pending(state, now).await?;
        Ok(ConsentView {
            brand_name: self.config.brand_name.clone(),
            state: pending.id,
            client_id: pending.client_id,
            scope: pending.scope,
            resource: pending.resource,
        })
    }

    /// Handle the approve/deny decision posted from the consent page.
    pub async fn complete_consent(
        &self,
        decision: &ConsentDecision,
        now: DateTime<Utc>,
    ) -> OAuthResult<RedirectTo> {
        let pending = self.load_pending(non_blank(decision.state.as_ref()), now).await?;

        if non_blank(decision.decision.as_ref()) != Some("approve") {
            self.stores.auth_requests.remove(&pending.id).await?;
            tracing::info!(client_id = %pending.client_id, "Consent denied");
            return Err(access_denied(&pending, "consent denied"));
        }
        let Some(user_id) = non_blank(pending.user_id.as_ref()) else {
            self.stores.auth_requests.remove(&pending.id).await?;
            return Err(access_denied(&pending, "user not authenticated"));
        };

        self.claim_pending(&pending).await?;
        let code = self.issue_code(&pending, user_id, now).await?;
        tracing::info!(client_id = %pending.client_id, "Consent approved");
        Ok(code_redirect(&pending, &code))
    }

    /// Handle `GET /oauth/google/login`: send the user to Google.
    pub async fn begin_federated_login(
        &self,
        state: Option<&str>,
        now: DateTime<Utc>,
    ) -> OAuthResult<RedirectTo> {
        let pending = self.load_pending(state, now).await?;
        Ok(RedirectTo::new(self.google.build_authorization_url(&pending.id)?))
    }

    /// Handle `GET /oauth/google/callback`.
    pub async fn complete_federated_login(
        &self,
        callback: &GoogleCallback,
        now: DateTime<Utc>,
    ) -> OAuthResult<RedirectTo> {
        let pending = self.load_pending(non_blank(callback.state.as_ref()), now).await?;
        let state = pending.original_state.as_deref();

        if let Some(error) = non_blank(callback.error.as_ref()) {
            self.stores.auth_requests.remove(&pending.id).await?;
            tracing::warn!(client_id = %pending.client_id, error, "Google authorization failed");
            return Err(OAuthError::redirect(
                &pending.redirect_uri,
                ErrorCode::Provider(error.to_owned()),
                "google authorization failed",
                state,
            ));
        }
        let Some(code) = non_blank(callback.code.as_ref()) else {
            return Err(OAuthError::redirect(
                &pending.redirect_uri,
                ErrorCode::InvalidRequest,
                "code is required",
                state,
            ));
        };

        let identity = match self.google.authenticate(code, now).await {
            Ok(identity) => identity,
            Err(err) if err.is_unavailable() => return Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    client_id = %pending.client_id,
                    error = %err,
                    "Google sign-in rejected"
                );
                return Err(OAuthError::redirect(
                    &pending.redirect_uri,
                    ErrorCode::InvalidRequest,
                    "google sign-in failed",
                    state,
                ));
            }
        };

        if let Err(err) = self.stores.users.upsert_federated_user(&identity, now).await {
            tracing::warn!(error = %err, "Failed to record federated user");
        }

        if !self.config.auto_consent {
            if !self.stores.auth_requests.update_user_id(&pending.id, &identity.subject).await? {
                return Err(OAuthError::invalid_request("authorization request expired"));
            }
            return Ok(RedirectTo::new(with_query(CONSENT_PATH, &[("state", pending.id.as_str())])));
        }

        self.claim_pending(&pending).await?;
        let code = self.issue_code(&pending, &identity.subject, now).await?;
        tracing::info!(client_id = %pending.client_id, "Federated login completed");
        Ok(code_redirect(&pending, &code))
    }

    /// Consume a pending request before a code is minted from it.
    ///
    /// Only one caller can remove the record; the others see it as gone.
    async fn claim_pending(&self, pending: &AuthRequestRecord) -> OAuthResult<()> {
        if self.stores.auth_requests.remove(&pending.id).await? {
            Ok(())
        } else {
            tracing::warn!(
                client_id = %pending.client_id,
                "Authorization request already consumed"
            );
            Err(OAuthError::invalid_request("authorization request expired"))
        }
    }

    /// Load a pending request that exists and has not expired.
    async fn load_pending(
        &self,
        state: Option<&str>,
        now: DateTime<Utc>,
    ) -> OAuthResult<AuthRequestRecord> {
        let id = state
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| OAuthError::invalid_request("state is required"))?;
        match self.stores.auth_requests.find(id).await? {
            Some(pending) if !pending.is_expired(now) => Ok(pending),
            _ => Err(OAuthError::invalid_request("authorization request expired")),
        }
    }
}

fn code_redirect(pending: &AuthRequestRecord, code: &str) -> RedirectTo {
    let mut params = vec![("code", code)];
    if let Some(state) = non_blank(pending.original_state.as_ref()) {
        params.push(("state", state));
    }
    RedirectTo::new(with_query(&pending.redirect_uri, &params))
}

fn access_denied(pending: &AuthRequestRecord, description: &'static str) -> OAuthError {
    OAuthError::redirect(
        &pending.redirect_uri,
        ErrorCode::AccessDenied,
        description,
        pending.original_state.as_deref(),
    )
}
