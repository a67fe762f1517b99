//! Configuration for the authorization server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::keys::KeySource;
use crate::store::StoreBackend;

/// Default values for every configurable setting.
pub mod defaults {
    use std::time::Duration;

    /// Pending authorization request lifetime (10 minutes).
    pub const AUTH_REQUEST_TTL: Duration = Duration::from_secs(600);

    /// Authorization code lifetime (5 minutes).
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(300);

    /// Refresh token lifetime (30 days).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Access token lifetime (1 hour).
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

    /// Clients unused for this long are removed by the sweep (7 days).
    pub const CLIENT_INACTIVITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Google authorization endpoint.
    pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

    /// Google token endpoint.
    pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

    /// Google signing keys.
    pub const GOOGLE_JWKS_URI: &str = "https://www.googleapis.com/oauth2/v3/certs";

    /// Scopes requested from Google.
    pub const GOOGLE_SCOPE: &str = "openid email profile";

    /// How long fetched Google keys are trusted (30 minutes).
    pub const GOOGLE_JWKS_TTL: Duration = Duration::from_secs(30 * 60);

    /// Key id published in the JWKS and stamped on access tokens.
    pub const KEY_ID: &str = "es256-1";

    /// Name shown on the consent page.
    pub const BRAND_NAME: &str = "EMP Auth";

    /// Timeout for outbound calls to the identity provider.
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Directory of the durable store when none is configured.
    pub const DURABLE_STORE_PATH: &str = "emp-auth-data";
}

/// Google OpenID Connect client settings.
#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub scope: String,
    pub jwks_cache_ttl: Duration,
}

impl GoogleConfig {
    /// Settings pointing at Google's production endpoints.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_endpoint: defaults::GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: defaults::GOOGLE_TOKEN_ENDPOINT.to_string(),
            jwks_uri: defaults::GOOGLE_JWKS_URI.to_string(),
            scope: defaults::GOOGLE_SCOPE.to_string(),
            jwks_cache_ttl: defaults::GOOGLE_JWKS_TTL,
        }
    }
}

impl std::fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_endpoint", &self.auth_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("jwks_uri", &self.jwks_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer identifier, also the base for derived endpoint URLs.
    pub issuer: String,

    /// Endpoint overrides for the metadata documents.
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub registration_endpoint: Option<String>,
    pub jwks_uri: Option<String>,

    /// Advertised scopes, omitted from metadata when empty.
    pub scopes_supported: Vec<String>,

    pub auth_request_ttl: Duration,
    pub auth_code_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub access_token_ttl: Duration,
    pub client_inactivity: Duration,

    /// Issue codes without showing the consent page.
    pub auto_consent: bool,

    /// User treated as already authenticated on `/oauth/authorize`.
    pub test_user_id: Option<String>,

    /// Audience used when a grant carries no `resource`.
    pub default_resource: Option<String>,

    pub key_id: String,
    pub key_source: Option<KeySource>,
    pub store: StoreBackend,
    pub google: GoogleConfig,
    pub brand_name: String,

    /// Timeout for outbound identity provider calls.
    pub http_timeout: Duration,

    /// Run the cleanup sweep on this interval when set.
    pub cleanup_interval: Option<Duration>,
}

impl Config {
    /// Create a configuration with defaults for the given issuer.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let google_redirect = google_callback_for(&issuer);
        Self {
            issuer,
            authorization_endpoint: None,
            token_endpoint: None,
            registration_endpoint: None,
            jwks_uri: None,
            scopes_supported: Vec::new(),
            auth_request_ttl: defaults::AUTH_REQUEST_TTL,
            auth_code_ttl: defaults::AUTH_CODE_TTL,
            refresh_token_ttl: defaults::REFRESH_TOKEN_TTL,
            access_token_ttl: defaults::ACCESS_TOKEN_TTL,
            client_inactivity: defaults::CLIENT_INACTIVITY,
            auto_consent: true,
            test_user_id: None,
            default_resource: None,
            key_id: defaults::KEY_ID.to_string(),
            key_source: None,
            store: StoreBackend::Memory,
            google: GoogleConfig::new("", "", google_redirect),
            brand_name: defaults::BRAND_NAME.to_string(),
            http_timeout: defaults::HTTP_TIMEOUT,
            cleanup_interval: None,
        }
    }

    /// Create a test configuration whose Google endpoints live under `issuer`,
    /// so a single mock server can stand in for both.
    #[must_use]
    pub fn for_testing(issuer: &str) -> Self {
        let base = issuer.trim_end_matches('/');
        let mut config = Self::new(base);
        config.google = GoogleConfig {
            client_id: "test-google-client".to_string(),
            client_secret: "test-google-secret".to_string(),
            redirect_uri: format!("{base}/oauth/google/callback"),
            auth_endpoint: format!("{base}/google/auth"),
            token_endpoint: format!("{base}/google/token"),
            jwks_uri: format!("{base}/google/certs"),
            scope: defaults::GOOGLE_SCOPE.to_string(),
            jwks_cache_ttl: defaults::GOOGLE_JWKS_TTL,
        };
        config.http_timeout = Duration::from_secs(5);
        config
    }

    /// Create configuration from `EMP_OAUTH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric or boolean variable cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        let issuer =
            env_string("EMP_OAUTH_ISSUER").unwrap_or_else(|| "http://localhost:8080".into());
        let mut config = Self::new(issuer);

        config.authorization_endpoint = env_string("EMP_OAUTH_AUTHORIZATION_ENDPOINT");
        config.token_endpoint = env_string("EMP_OAUTH_TOKEN_ENDPOINT");
        config.registration_endpoint = env_string("EMP_OAUTH_REGISTRATION_ENDPOINT");
        config.jwks_uri = env_string("EMP_OAUTH_JWKS_URI");
        config.scopes_supported = env_string("EMP_OAUTH_SCOPES_SUPPORTED")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        config.auth_request_ttl =
            env_secs("EMP_OAUTH_AUTH_REQUEST_TTL_SECONDS", config.auth_request_ttl)?;
        config.auth_code_ttl = env_secs("EMP_OAUTH_AUTH_CODE_TTL_SECONDS", config.auth_code_ttl)?;
        config.refresh_token_ttl =
            env_secs("EMP_OAUTH_REFRESH_TOKEN_TTL_SECONDS", config.refresh_token_ttl)?;
        config.access_token_ttl =
            env_secs("EMP_OAUTH_ACCESS_TOKEN_TTL_SECONDS", config.access_token_ttl)?;
        if let Some(days) = env_parse::<u64>("EMP_OAUTH_CLEANUP_CLIENTS_INACTIVE_DAYS")? {
            config.client_inactivity = days_to_duration(days)
                .context("EMP_OAUTH_CLEANUP_CLIENTS_INACTIVE_DAYS is too large")?;
        }
        config.http_timeout = env_secs("EMP_OAUTH_HTTP_TIMEOUT_SECONDS", config.http_timeout)?;
        config.cleanup_interval =
            env_parse::<u64>("EMP_OAUTH_CLEANUP_INTERVAL_SECONDS")?.map(Duration::from_secs);

        config.auto_consent = env_parse("EMP_OAUTH_AUTO_CONSENT")?.unwrap_or(true);
        config.test_user_id = env_string("EMP_OAUTH_TEST_USER_ID");
        config.default_resource = env_string("EMP_OAUTH_DEFAULT_RESOURCE");
        if let Some(key_id) = env_string("EMP_OAUTH_KEY_ID") {
            config.key_id = key_id;
        }
        if let Some(brand) = env_string("EMP_OAUTH_CONSENT_BRAND_NAME") {
            config.brand_name = brand;
        }

        config.key_source = key_source_from_env();

        if env_parse("EMP_OAUTH_DURABLE_STORE")?.unwrap_or(false) {
            let path = env_string("EMP_OAUTH_DURABLE_STORE_PATH")
                .unwrap_or_else(|| defaults::DURABLE_STORE_PATH.to_string());
            config.store = StoreBackend::Durable {
                path: PathBuf::from(path),
            };
        }

        let google = &mut config.google;
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_CLIENT_ID") {
            google.client_id = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_CLIENT_SECRET") {
            google.client_secret = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_REDIRECT_URI") {
            google.redirect_uri = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_AUTH_ENDPOINT") {
            google.auth_endpoint = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_TOKEN_ENDPOINT") {
            google.token_endpoint = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_JWKS_URI") {
            google.jwks_uri = v;
        }
        if let Some(v) = env_string("EMP_OAUTH_GOOGLE_SCOPE") {
            google.scope = v;
        }

        Ok(config)
    }

    /// Replace the issuer, moving a derived Google callback URI along with it.
    pub fn set_issuer(&mut self, issuer: impl Into<String>) {
        let derived = google_callback_for(&self.issuer);
        self.issuer = issuer.into();
        if self.google.redirect_uri == derived {
            self.google.redirect_uri = google_callback_for(&self.issuer);
        }
    }

    fn base_url(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    #[must_use]
    pub fn authorization_endpoint_url(&self) -> String {
        self.authorization_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/authorize", self.base_url()))
    }

    #[must_use]
    pub fn token_endpoint_url(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| format!("{}/oauth/token", self.base_url()))
    }

    #[must_use]
    pub fn registration_endpoint_url(&self) -> String {
        self.registration_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/register", self.base_url()))
    }

    #[must_use]
    pub fn jwks_uri_url(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| format!("{}/jwks.json", self.base_url()))
    }
}

fn google_callback_for(issuer: &str) -> String {
    format!("{}/oauth/google/callback", issuer.trim_end_matches('/'))
}

/// Resolve the signing key source; key files win over secrets.
fn key_source_from_env() -> Option<KeySource> {
    if let Some(private_key_path) = env_string("EMP_OAUTH_PRIVATE_KEY_PATH") {
        return Some(KeySource::File {
            private_key_path: PathBuf::from(private_key_path),
            public_key_path: env_string("EMP_OAUTH_PUBLIC_KEY_PATH").map(PathBuf::from),
        });
    }
    env_string("EMP_OAUTH_PRIVATE_KEY_SECRET").map(|private_key_env| KeySource::Secret {
        private_key_env,
        public_key_env: env_string("EMP_OAUTH_PUBLIC_KEY_SECRET"),
    })
}

/// Read a variable, treating blank values as unset.
fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value: {value}"))
        })
        .transpose()
}

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(env_parse::<u64>(name)?.map_or(default, Duration::from_secs))
}

fn days_to_duration(days: u64) -> Option<Duration> {
    days.checked_mul(24 * 60 * 60).map(Duration::from_secs)
}
