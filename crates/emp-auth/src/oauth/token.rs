//! Token endpoint: `authorization_code` and `refresh_token` grants.
//!
//! Both grants validate, resolve the audience and sign the access token before
//! claiming the code or refresh token, so a missing resource or unavailable
//! key never burns a credential. The claim is the store's atomic `mark_used`;
//! a caller that loses it gets `invalid_grant` like any other replay.

use chrono::{DateTime, Utc};

use super::issue::{REFRESH_TOKEN_BYTES, random_token};
use super::{AuthorizationServer, TokenRequest, TokenResponse, non_blank};
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::models::PKCE_METHOD_S256;
use crate::pkce;

const TOKEN_TYPE_BEARER: &str = "Bearer";

impl AuthorizationServer {
    /// Handle `POST /oauth/token`.
    pub async fn token(
        &self,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> OAuthResult<TokenResponse> {
        match non_blank(request.grant_type.as_ref()) {
            Some("authorization_code") => self.authorization_code_grant(request, now).await,
            Some("refresh_token") => self.refresh_token_grant(request, now).await,
            Some(_) => Err(OAuthError::request(
                ErrorCode::UnsupportedGrantType,
                "grant_type must be authorization_code or refresh_token",
            )),
            None => Err(OAuthError::invalid_request("grant_type is required")),
        }
    }

    async fn authorization_code_grant(
        &self,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> OAuthResult<TokenResponse> {
        let code = non_blank(request.code.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("code is required"))?;
        let client_id = non_blank(request.client_id.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

        let record = self
            .stores
            .auth_codes
            .find(code)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("code is invalid"))?;
        if record.client_id != client_id {
            return Err(OAuthError::invalid_grant("client_id does not match"));
        }
        if non_blank(request.redirect_uri.as_ref()) != Some(record.redirect_uri.as_str()) {
            return Err(OAuthError::invalid_grant("redirect_uri does not match"));
        }
        if record.is_used() {
            return Err(OAuthError::invalid_grant("code was already used"));
        }
        if record.is_expired(now) {
            return Err(OAuthError::invalid_grant("code has expired"));
        }
        let verifier = non_blank(request.code_verifier.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("code_verifier is required"))?;
        if record.code_challenge_method != PKCE_METHOD_S256 {
            return Err(OAuthError::invalid_grant("unsupported code_challenge_method"));
        }
        if !pkce::verify_s256(verifier, &record.code_challenge) {
            return Err(OAuthError::invalid_grant("code_verifier is invalid"));
        }

        let audience = self.resolve_audience(record.resource.as_deref())?;
        let email = self.resolve_email(&record.user_id).await;
        let access_token = self
            .signer
            .issue_access_token(
                &record.user_id,
                &audience,
                record.scope.as_deref(),
                &record.client_id,
                email.as_deref(),
                now,
            )
            .await?;

        if !self.stores.auth_codes.mark_used(code, now).await? {
            tracing::warn!(client_id, "Authorization code replayed concurrently");
            return Err(OAuthError::invalid_grant("code was already used"));
        }

        let refresh_token = self
            .issue_refresh_token(
                random_token(REFRESH_TOKEN_BYTES),
                &record.client_id,
                &record.user_id,
                record.scope.as_deref(),
                record.resource.as_deref(),
                now,
            )
            .await?;

        tracing::info!(client_id, "Issued tokens for authorization code");
        Ok(self.token_response(access_token, refresh_token, record.scope))
    }

    async fn refresh_token_grant(
        &self,
        request: &TokenRequest,
        now: DateTime<Utc>,
    ) -> OAuthResult<TokenResponse> {
        let token = non_blank(request.refresh_token.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("refresh_token is required"))?;
        let client_id = non_blank(request.client_id.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

        let record = self
            .stores
            .refresh_tokens
            .find(token)
            .await?
            .ok_or_else(|| OAuthError::invalid_grant("refresh_token is invalid"))?;
        if record.client_id != client_id {
            return Err(OAuthError::invalid_grant("client_id does not match"));
        }
        if record.is_used() {
            return Err(OAuthError::invalid_grant("refresh_token was already used"));
        }
        if record.is_expired(now) {
            return Err(OAuthError::invalid_grant("refresh_token has expired"));
        }

        let audience = self.resolve_audience(record.resource.as_deref())?;
        let email = self.resolve_email(&record.user_id).await;
        let access_token = self
            .signer
            .issue_access_token(
                &record.user_id,
                &audience,
                record.scope.as_deref(),
                &record.client_id,
                email.as_deref(),
                now,
            )
            .await?;

        let successor = random_token(REFRESH_TOKEN_BYTES);
        if !self.stores.refresh_tokens.mark_used(token, now, Some(&successor)).await? {
            tracing::warn!(client_id, "Refresh token replayed concurrently");
            return Err(OAuthError::invalid_grant("refresh_token was already used"));
        }
        let refresh_token = self
            .issue_refresh_token(
                successor,
                &record.client_id,
                &record.user_id,
                record.scope.as_deref(),
                record.resource.as_deref(),
                now,
            )
            .await?;

        tracing::info!(client_id, "Rotated refresh token");
        Ok(self.token_response(access_token, refresh_token, record.scope))
    }

    /// The grant's resource, else the configured default resource.
    fn resolve_audience(&self, resource: Option<&str>) -> OAuthResult<String> {
        resource
            .filter(|r| !r.trim().is_empty())
            .or_else(|| self.config.default_resource.as_deref().filter(|r| !r.trim().is_empty()))
            .map(str::to_owned)
            .ok_or_else(|| OAuthError::invalid_request("resource is required"))
    }

    /// Email claim for the user; lookup failures only cost the claim.
    async fn resolve_email(&self, user_id: &str) -> Option<String> {
        match self.stores.users.find_email(user_id).await {
            Ok(Some(email)) => return Some(email),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "User email lookup failed"),
        }
        user_id.contains('@').then(|| user_id.to_owned())
    }

    fn token_response(
        &self,
        access_token: String,
        refresh_token: String,
        scope: Option<String>,
    ) -> TokenResponse {
        TokenResponse {
            access_token,
            token_type: TOKEN_TYPE_BEARER.to_owned(),
            expires_in: self.signer.access_token_ttl().as_secs(),
            refresh_token,
            scope: scope.filter(|s| !s.trim().is_empty()),
        }
    }
}
