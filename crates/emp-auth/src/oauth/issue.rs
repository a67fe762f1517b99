//! Issuance of codes, refresh tokens and pending-request ids.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use super::AuthorizationServer;
use crate::error::StoreResult;
use crate::models::{AuthRequestRecord, AuthorizationCodeRecord, RefreshTokenRecord};

pub(crate) const CODE_BYTES: usize = 32;
pub(crate) const REFRESH_TOKEN_BYTES: usize = 48;
pub(crate) const REQUEST_ID_BYTES: usize = 32;

/// `len` bytes from the OS RNG, URL-safe base64 without padding.
#[must_use]
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn expires_at(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl).map_or(DateTime::<Utc>::MAX_UTC, |ttl| {
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

impl AuthorizationServer {
    /// Issue and store an authorization code bound to `user_id` and the
    /// request's PKCE challenge.
    pub(crate) async fn issue_code(
        &self,
        request: &AuthRequestRecord,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<String> {
        let code = random_token(CODE_BYTES);
        self.stores
            .auth_codes
            .save(AuthorizationCodeRecord {
                code: code.clone(),
                client_id: request.client_id.clone(),
                user_id: user_id.to_owned(),
                redirect_uri: request.redirect_uri.clone(),
                scope: request.scope.clone(),
                resource: request.resource.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method.clone(),
                expires_at: expires_at(now, self.config.auth_code_ttl),
                used_at: None,
            })
            .await?;
        tracing::debug!(client_id = %request.client_id, "Issued authorization code");
        Ok(code)
    }

    /// Store a refresh token with the given value.
    pub(crate) async fn issue_refresh_token(
        &self,
        token: String,
        client_id: &str,
        user_id: &str,
        scope: Option<&str>,
        resource: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<String> {
        self.stores
            .refresh_tokens
            .save(RefreshTokenRecord {
                token: token.clone(),
                client_id: client_id.to_owned(),
                user_id: user_id.to_owned(),
                scope: scope.map(str::to_owned),
                resource: resource.map(str::to_owned),
                expires_at: expires_at(now, self.config.refresh_token_ttl),
                used_at: None,
                rotated_to: None,
            })
            .await?;
        Ok(token)
    }

    /// Expiry of a pending request created at `now`.
    pub(crate) fn auth_request_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        expires_at(now, self.config.auth_request_ttl)
    }
}
