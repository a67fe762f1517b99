//! Dynamic client registration (RFC 7591), public clients only.

use chrono::{DateTime, Utc};

use super::{AuthorizationServer, RegisterRequest, RegisterResponse, non_blank};
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::models::{AUTH_METHOD_NONE, ClientRecord};

/// Confidential-client methods accepted at registration but downgraded to `none`.
const COERCED_AUTH_METHODS: &[&str] = &["client_secret_basic", "client_secret_post"];

impl AuthorizationServer {
    /// Handle `POST /oauth/register`.
    pub async fn register(
        &self,
        request: &RegisterRequest,
        now: DateTime<Utc>,
    ) -> OAuthResult<RegisterResponse> {
        let redirect_uris: Vec<String> = request
            .redirect_uris
            .iter()
            .flatten()
            .filter(|uri| !uri.trim().is_empty())
            .cloned()
            .collect();
        if redirect_uris.is_empty() {
            return Err(OAuthError::invalid_request("redirect_uris is required"));
        }

        let auth_method = match non_blank(request.token_endpoint_auth_method.as_ref()) {
            None => AUTH_METHOD_NONE,
            Some(method)
                if method == AUTH_METHOD_NONE || COERCED_AUTH_METHODS.contains(&method) =>
            {
                AUTH_METHOD_NONE
            }
            Some(_) => {
                return Err(OAuthError::request(
                    ErrorCode::InvalidClientMetadata,
                    "token_endpoint_auth_method must be none for public clients",
                ));
            }
        };

        let client = ClientRecord {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_name: non_blank(request.client_name.as_ref()).map(str::to_owned),
            redirect_uris,
            token_endpoint_auth_method: auth_method.to_owned(),
            created_at: now,
            last_used_at: None,
        };
        self.stores.clients.save(client.clone()).await?;
        tracing::info!(client_id = %client.client_id, "Registered OAuth client");

        Ok(RegisterResponse {
            client_id: client.client_id,
            client_id_issued_at: client.created_at.timestamp(),
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
            scope: non_blank(request.scope.as_ref()).map(str::to_owned),
        })
    }
}
