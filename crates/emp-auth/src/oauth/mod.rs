//! OAuth 2.0 protocol engine.
//!
//! [`AuthorizationServer`] composes the stores, the token signer and the
//! Google client into the authorize, consent, federated-login, token and
//! registration flows. It knows nothing about HTTP: handlers pass parsed
//! parameters in and turn [`RedirectTo`], [`TokenResponse`] and
//! [`OAuthError`](crate::error::OAuthError) into responses.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7636: PKCE (S256 only)
//! - RFC 7591: Dynamic Client Registration (public clients only)

mod authorize;
mod issue;
mod register;
mod token;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use authorize::ConsentView;
pub use issue::random_token;

use crate::cleanup::CleanupSweeper;
use crate::config::Config;
use crate::google::GoogleOidcClient;
use crate::jwt::TokenSigner;
use crate::keys::{ConfiguredKeyProvider, KeyMaterialProvider};
use crate::store::Stores;

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub resource: Option<String>,
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// JSON body of `POST /oauth/register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub redirect_uris: Option<Vec<String>>,
    pub client_name: Option<String>,
    pub token_endpoint_auth_method: Option<String>,
    pub scope: Option<String>,
}

/// Registration echo returned with 201.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Form body of `POST /oauth/consent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsentDecision {
    pub state: Option<String>,
    pub decision: Option<String>,
}

/// Query parameters of `GET /oauth/google/callback`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleCallback {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
}

/// Where the user agent is sent next (303 See Other).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTo {
    pub location: String,
}

impl RedirectTo {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// The authorization server's protocol engine.
pub struct AuthorizationServer {
    config: Arc<Config>,
    stores: Stores,
    signer: TokenSigner,
    google: GoogleOidcClient,
}

impl AuthorizationServer {
    /// Build the server from configuration: stores from the configured
    /// backend, key material from the configured source.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or the HTTP client cannot be built.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let stores = Stores::from_backend(&config.store)?;
        let keys = Arc::new(ConfiguredKeyProvider::new(config.key_source.clone()));
        Self::with_parts(config, stores, keys)
    }

    /// Build the server around explicit stores and key material.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn with_parts(
        config: Config,
        stores: Stores,
        keys: Arc<dyn KeyMaterialProvider>,
    ) -> anyhow::Result<Self> {
        let signer = TokenSigner::new(
            keys,
            config.issuer.clone(),
            config.key_id.clone(),
            config.access_token_ttl,
        );
        let google = GoogleOidcClient::new(config.google.clone(), config.http_timeout)?;
        Ok(Self {
            config: Arc::new(config),
            stores,
            signer,
            google,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub const fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    #[must_use]
    pub const fn google(&self) -> &GoogleOidcClient {
        &self.google
    }

    /// A sweeper over this server's stores.
    #[must_use]
    pub fn sweeper(&self) -> CleanupSweeper {
        CleanupSweeper::new(self.stores.clone(), self.config.client_inactivity)
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("issuer", &self.config.issuer)
            .field("signer", &self.signer)
            .finish()
    }
}

/// A parameter value, with blank strings treated as absent.
pub(crate) fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// Append query parameters to a URI that may already carry a query.
pub(crate) fn with_query(base: &str, params: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    let query = serializer.finish();
    if query.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}
