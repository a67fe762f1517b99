//! Error types for the authorization server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Protocol failures carry an RFC 6749 error code; infrastructure failures wrap the
//! error of the layer that produced them.

use std::borrow::Cow;
use std::fmt;

/// OAuth 2.0 error codes as they appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidGrant,
    InvalidClientMetadata,
    UnsupportedGrantType,
    UnsupportedResponseType,
    AccessDenied,
    ServerError,
    TemporarilyUnavailable,
    /// Error reported by the federated identity provider, passed through verbatim.
    Provider(String),
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClientMetadata => "invalid_client_metadata",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::AccessDenied => "access_denied",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
            Self::Provider(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a store backend.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The backing database failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Errors loading or using the server's signing key.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// No key source is configured.
    #[error("signing key is not configured")]
    NotConfigured,

    /// The key source could not be read.
    #[error("unable to read {what}: {message}")]
    Unreadable {
        /// Which key material was being read
        what: &'static str,
        /// Underlying failure
        message: String,
    },

    /// The PEM document is not a usable P-256 key.
    #[error("invalid {what}: {message}")]
    Invalid {
        /// Which key material was being parsed
        what: &'static str,
        /// Parser message
        message: String,
    },

    /// The configured public key does not belong to the private key.
    #[error("public key does not match private key")]
    Mismatch,

    /// The signature produced by the signer could not be converted to JOSE form.
    #[error("malformed DER signature: {0}")]
    MalformedSignature(&'static str),

    /// JSON encoding of a token segment failed.
    #[error("token encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl KeyError {
    pub(crate) fn unreadable(what: &'static str, message: impl fmt::Display) -> Self {
        Self::Unreadable {
            what,
            message: message.to_string(),
        }
    }

    pub(crate) fn invalid(what: &'static str, message: impl fmt::Display) -> Self {
        Self::Invalid {
            what,
            message: message.to_string(),
        }
    }
}

/// Errors from the federated identity provider.
#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    /// HTTP transport error (connection, DNS, TLS, timeout).
    #[error("identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered with a non-200 status.
    #[error("google token exchange failed: {status}")]
    TokenEndpoint {
        /// HTTP status code
        status: u16,
    },

    /// The token endpoint response had no `id_token`.
    #[error("google token response missing id_token")]
    MissingIdToken,

    /// The provider's signing keys could not be fetched.
    #[error("unable to fetch google JWKS: {0}")]
    Jwks(String),

    /// A configured provider URL is malformed.
    #[error("invalid identity provider configuration: {0}")]
    Config(String),

    /// The ID token failed signature or claim validation.
    #[error("invalid identity token: {0}")]
    InvalidIdToken(Cow<'static, str>),
}

impl IdentityError {
    pub(crate) fn invalid(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidIdToken(reason.into())
    }

    /// Returns true if the failure says nothing about the user's identity and the
    /// request may succeed once the provider is reachable again.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Jwks(_) | Self::Config(_))
    }
}

/// Errors surfaced by the protocol endpoints.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// Returned to the caller as a JSON body with status 400.
    #[error("{code}: {description}")]
    Request {
        /// Wire error code
        code: ErrorCode,
        /// Human-readable description
        description: Cow<'static, str>,
    },

    /// Returned to the client's confirmed redirect URI as query parameters.
    #[error("{code}: {description} (redirect to {redirect_uri})")]
    Redirect {
        /// Confirmed redirect URI of the client
        redirect_uri: String,
        /// Wire error code
        code: ErrorCode,
        /// Human-readable description
        description: Cow<'static, str>,
        /// Caller-supplied `state` to round-trip
        state: Option<String>,
    },

    /// Signing key could not be loaded or used.
    #[error("key material unavailable: {0}")]
    KeyMaterial(#[from] KeyError),

    /// The identity provider could not be reached.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A store backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OAuthError {
    /// Create an error answered directly to the caller.
    #[must_use]
    pub fn request(code: ErrorCode, description: impl Into<Cow<'static, str>>) -> Self {
        Self::Request {
            code,
            description: description.into(),
        }
    }

    /// Create an `invalid_request` error.
    #[must_use]
    pub fn invalid_request(description: impl Into<Cow<'static, str>>) -> Self {
        Self::request(ErrorCode::InvalidRequest, description)
    }

    /// Create an `invalid_grant` error.
    #[must_use]
    pub fn invalid_grant(description: impl Into<Cow<'static, str>>) -> Self {
        Self::request(ErrorCode::InvalidGrant, description)
    }

    /// Create an error delivered through the client's redirect URI.
    #[must_use]
    pub fn redirect(
        redirect_uri: impl Into<String>,
        code: ErrorCode,
        description: impl Into<Cow<'static, str>>,
        state: Option<&str>,
    ) -> Self {
        Self::Redirect {
            redirect_uri: redirect_uri.into(),
            code,
            description: description.into(),
            state: state.filter(|s| !s.is_empty()).map(str::to_owned),
        }
    }

    /// The wire error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Request { code, .. } | Self::Redirect { code, .. } => code.clone(),
            Self::KeyMaterial(_) | Self::Identity(_) => ErrorCode::TemporarilyUnavailable,
            Self::Store(_) => ErrorCode::ServerError,
        }
    }

    /// Human-readable description for the `error_description` field.
    #[must_use]
    pub fn description(&self) -> Cow<'_, str> {
        match self {
            Self::Request { description, .. } | Self::Redirect { description, .. } => {
                Cow::Borrowed(description.as_ref())
            }
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;
