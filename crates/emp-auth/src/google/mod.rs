//! Google OpenID Connect client.
//!
//! Builds the Google authorization URL, exchanges the returned code for an ID
//! token and verifies that token (RS256 signature against the cached JWKS,
//! then issuer, audience and time claims). Outbound calls are never retried.

pub mod jwks;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rsa::pkcs1v15;
use rsa::signature::Verifier;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

pub use jwks::JwksCache;

use crate::config::GoogleConfig;
use crate::error::IdentityError;
use crate::models::FederatedIdentity;

const ISSUER_HTTPS: &str = "https://accounts.google.com";
const ISSUER_PLAIN: &str = "accounts.google.com";
const CLOCK_SKEW_SECONDS: i64 = 300;

#[derive(Deserialize)]
struct IdTokenHeader {
    alg: Option<String>,
    kid: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    iss: Option<String>,
    aud: Option<Value>,
    sub: Option<String>,
    email: Option<String>,
    email_verified: Option<Value>,
    exp: Option<Value>,
    iat: Option<Value>,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    id_token: Option<String>,
}

/// Client for Google sign-in.
#[derive(Debug)]
pub struct GoogleOidcClient {
    config: GoogleConfig,
    http: reqwest::Client,
    jwks: JwksCache,
}

impl GoogleOidcClient {
    /// Create a client whose outbound calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: GoogleConfig, timeout: std::time::Duration) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let jwks = JwksCache::new(http.clone(), config.jwks_uri.clone(), config.jwks_cache_ttl);
        Ok(Self { config, http, jwks })
    }

    /// Google authorization URL carrying `state` as the correlation token.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Config` if the client id or endpoint is not usable.
    pub fn build_authorization_url(&self, state: &str) -> Result<String, IdentityError> {
        if self.config.client_id.is_empty() {
            return Err(IdentityError::Config("google client id is not configured".into()));
        }
        let mut url = url::Url::parse(&self.config.auth_endpoint)
            .map_err(|e| IdentityError::Config(format!("google auth endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", "consent");
        Ok(url.into())
    }

    /// Exchange an authorization code for the raw ID token.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::TokenEndpoint` on a non-200 answer,
    /// `IdentityError::MissingIdToken` when the answer has no `id_token`, and
    /// `IdentityError::Transport` when Google cannot be reached.
    pub async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self.http.post(&self.config.token_endpoint).form(&params).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Google token exchange failed");
            return Err(IdentityError::TokenEndpoint {
                status: status.as_u16(),
            });
        }

        let body: TokenEndpointResponse =
            response.json().await.map_err(|_| IdentityError::MissingIdToken)?;
        body.id_token.filter(|t| !t.is_empty()).ok_or(IdentityError::MissingIdToken)
    }

    /// Exchange `code` and verify the resulting ID token.
    ///
    /// # Errors
    ///
    /// Propagates exchange and verification failures.
    pub async fn authenticate(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<FederatedIdentity, IdentityError> {
        let id_token = self.exchange_code(code).await?;
        self.verify_id_token_at(&id_token, now).await
    }

    /// Verify an ID token against the current time.
    ///
    /// # Errors
    ///
    /// See [`Self::verify_id_token_at`].
    pub async fn verify_id_token(&self, token: &str) -> Result<FederatedIdentity, IdentityError> {
        self.verify_id_token_at(token, Utc::now()).await
    }

    /// Verify an ID token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidIdToken` for any signature or claim
    /// failure and `IdentityError::Jwks` when Google's keys cannot be fetched.
    pub async fn verify_id_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<FederatedIdentity, IdentityError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityError::invalid("malformed id_token"));
        };

        let header: IdTokenHeader = decode_segment(header_b64)?;
        if header.alg.as_deref() != Some("RS256") {
            return Err(IdentityError::invalid("unsupported id_token alg"));
        }
        let kid = header.kid.ok_or_else(|| IdentityError::invalid("id_token has no key id"))?;
        let public_key = self.jwks.key(&kid).await?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| IdentityError::invalid("malformed id_token signature"))?;
        let signature = pkcs1v15::Signature::try_from(signature_bytes.as_slice())
            .map_err(|_| IdentityError::invalid("malformed id_token signature"))?;
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| IdentityError::invalid("invalid id_token signature"))?;

        let claims: IdTokenClaims = decode_segment(claims_b64)?;
        self.validate_claims(claims, now)
    }

    fn validate_claims(
        &self,
        claims: IdTokenClaims,
        now: DateTime<Utc>,
    ) -> Result<FederatedIdentity, IdentityError> {
        let iss = claims.iss.unwrap_or_default();
        if iss != ISSUER_HTTPS && iss != ISSUER_PLAIN {
            return Err(IdentityError::invalid("invalid issuer"));
        }
        if claims.aud.as_ref().and_then(Value::as_str) != Some(self.config.client_id.as_str()) {
            return Err(IdentityError::invalid("invalid audience"));
        }

        let now = now.timestamp();
        let exp = claims.exp.as_ref().and_then(numeric_claim);
        let iat = claims.iat.as_ref().and_then(numeric_claim);
        let (Some(exp), Some(iat)) = (exp, iat) else {
            return Err(IdentityError::invalid("missing exp or iat"));
        };
        if now > exp.saturating_add(CLOCK_SKEW_SECONDS) {
            return Err(IdentityError::invalid("token expired"));
        }
        if iat.saturating_sub(CLOCK_SKEW_SECONDS) > now {
            return Err(IdentityError::invalid("invalid iat"));
        }

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IdentityError::invalid("missing sub"))?;
        Ok(FederatedIdentity {
            subject,
            email: claims.email,
            email_verified: claims.email_verified.as_ref().and_then(flag_claim),
        })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, IdentityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| IdentityError::invalid("malformed id_token segment"))?;
    serde_json::from_slice(&bytes).map_err(|_| IdentityError::invalid("malformed id_token segment"))
}

/// Integer claim sent either as a JSON number or a numeric string.
fn numeric_claim(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean claim sent either as a JSON bool or the strings "true"/"false".
fn flag_claim(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GoogleOidcClient {
        let mut config = GoogleConfig::new(
            "google-client",
            "secret",
            "https://auth.example.com/oauth/google/callback",
        );
        config.auth_endpoint = "https://accounts.example.com/auth".into();
        GoogleOidcClient::new(config, std::time::Duration::from_secs(1)).unwrap()
    }

    fn claims(value: Value) -> IdTokenClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_authorization_url_parameters() {
        let url = url::Url::parse(&client().build_authorization_url("req-1").unwrap()).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/auth");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "google-client");
        assert_eq!(params["redirect_uri"], "https://auth.example.com/oauth/google/callback");
        assert_eq!(params["scope"], "openid email profile");
        assert_eq!(params["state"], "req-1");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["include_granted_scopes"], "true");
        assert_eq!(params["prompt"], "consent");
    }

    #[test]
    fn test_unconfigured_client_id() {
        let mut config = GoogleConfig::new("", "", "https://cb");
        config.client_id.clear();
        let client = GoogleOidcClient::new(config, std::time::Duration::from_secs(1)).unwrap();
        assert!(client.build_authorization_url("s").unwrap_err().is_unavailable());
    }

    #[test]
    fn test_claims_accept_string_numbers_and_flags() {
        let now = Utc::now();
        let identity = client()
            .validate_claims(
                claims(json!({
                    "iss": "accounts.google.com",
                    "aud": "google-client",
                    "sub": "1234",
                    "email": "a@example.com",
                    "email_verified": "true",
                    "exp": (now.timestamp() + 60).to_string(),
                    "iat": now.timestamp()
                })),
                now,
            )
            .unwrap();
        assert_eq!(identity.subject, "1234");
        assert_eq!(identity.email_verified, Some(true));
    }

    #[test]
    fn test_claims_clock_skew() {
        let now = Utc::now();
        let base = |exp: i64, iat: i64| {
            claims(json!({
                "iss": ISSUER_HTTPS, "aud": "google-client", "sub": "s", "exp": exp, "iat": iat
            }))
        };
        let t = now.timestamp();
        let c = client();
        assert!(c.validate_claims(base(t - 299, t - 900), now).is_ok());
        assert!(c.validate_claims(base(t - 301, t - 900), now).is_err());
        assert!(c.validate_claims(base(t + 900, t + 299), now).is_ok());
        assert!(c.validate_claims(base(t + 900, t + 301), now).is_err());
    }

    #[test]
    fn test_claims_reject_wrong_issuer_and_audience() {
        let now = Utc::now();
        let t = now.timestamp();
        let c = client();
        let wrong_iss = claims(json!({
            "iss": "https://evil.example",
            "aud": "google-client",
            "sub": "s",
            "exp": t + 60,
            "iat": t
        }));
        assert!(c.validate_claims(wrong_iss, now).is_err());
        let wrong_aud = claims(json!({
            "iss": ISSUER_HTTPS,
            "aud": "someone-else",
            "sub": "s",
            "exp": t + 60,
            "iat": t
        }));
        assert!(c.validate_claims(wrong_aud, now).is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_rs256_before_fetching_keys() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","kid":"k"}"#);
        let token = format!("{header}.e30.c2ln");
        let err = client().verify_id_token(&token).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidIdToken(_)));
    }
}
