//! Discovery documents (RFC 8414 and OpenID Connect Discovery).

use serde::Serialize;

use crate::config::Config;

/// `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            authorization_endpoint: config.authorization_endpoint_url(),
            token_endpoint: config.token_endpoint_url(),
            registration_endpoint: config.registration_endpoint_url(),
            jwks_uri: config.jwks_uri_url(),
            response_types_supported: vec!["code"],
            grant_types_supported: vec!["authorization_code", "refresh_token"],
            token_endpoint_auth_methods_supported: vec!["none"],
            code_challenge_methods_supported: vec!["S256"],
            scopes_supported: config.scopes_supported.clone(),
        }
    }
}

/// `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenIdConfiguration {
    #[serde(flatten)]
    pub server: AuthorizationServerMetadata,
    pub response_modes_supported: Vec<&'static str>,
    pub subject_types_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<&'static str>,
    pub claims_supported: Vec<&'static str>,
}

impl OpenIdConfiguration {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: AuthorizationServerMetadata::from_config(config),
            response_modes_supported: vec!["query"],
            subject_types_supported: vec!["public"],
            id_token_signing_alg_values_supported: vec!["ES256"],
            claims_supported: vec!["sub", "email", "email_verified"],
        }
    }
}
