//! EMP Auth
//!
//! A minimal OAuth 2.0 / OpenID Connect authorization server for public
//! clients.
//!
//! # Features
//!
//! - **Authorization Code + PKCE**: S256 only, single-use codes
//! - **Refresh token rotation**: every redemption issues a successor
//! - **ES256 access tokens**: published through `/jwks.json`
//! - **Google sign-in**: RS256 ID tokens verified against a cached JWKS
//! - **Dynamic client registration**: public clients only
//! - **Pluggable storage**: in-memory or an embedded `sled` database
//!
//! # Example
//!
//! ```no_run
//! use emp_auth::{AuthorizationServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = AuthorizationServer::new(config)?;
//!     emp_auth::server::run_http(server, 8080).await
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod google;
pub mod jwt;
pub mod keys;
pub mod models;
pub mod oauth;
pub mod pkce;
pub mod server;
pub mod store;

pub use cleanup::{CleanupReport, CleanupSweeper};
pub use config::Config;
pub use error::{ErrorCode, IdentityError, KeyError, OAuthError, StoreError};
pub use oauth::AuthorizationServer;
pub use store::Stores;
