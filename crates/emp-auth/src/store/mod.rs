//! Storage contracts for the client registry, the ledgers and the user directory.
//!
//! Two interchangeable backends implement every contract:
//! - [`memory`]: process-local maps, lost on restart
//! - [`durable`]: an embedded `sled` database that survives restarts
//!
//! `mark_used` is an atomic claim in both backends: exactly one caller sees
//! `true` for a given record, every later read observes the mark.

pub mod durable;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{
    AuthRequestRecord, AuthorizationCodeRecord, ClientRecord, FederatedIdentity,
    RefreshTokenRecord, UserRecord,
};

/// Registered OAuth clients.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn save(&self, client: ClientRecord) -> StoreResult<()>;

    async fn find(&self, client_id: &str) -> StoreResult<Option<ClientRecord>>;

    /// Check that `redirect_uri` is registered for `client_id`; unknown clients allow nothing.
    async fn is_redirect_uri_allowed(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .find(client_id)
            .await?
            .is_some_and(|client| client.allows_redirect_uri(redirect_uri)))
    }

    /// Record activity for the inactivity sweep. Unknown clients are ignored.
    async fn update_last_used_at(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove clients whose last activity is before `cutoff`.
    async fn cleanup_inactive(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Pending authorization requests.
#[async_trait]
pub trait AuthRequestStore: Send + Sync {
    async fn save(&self, request: AuthRequestRecord) -> StoreResult<()>;

    async fn find(&self, id: &str) -> StoreResult<Option<AuthRequestRecord>>;

    /// Consume a request. Returns true only for the caller that removed it.
    async fn remove(&self, id: &str) -> StoreResult<bool>;

    /// Attach the resolved user. Returns false if the request no longer exists.
    async fn update_user_id(&self, id: &str, user_id: &str) -> StoreResult<bool>;

    /// Remove requests whose expiry is before `now`.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Issued authorization codes.
#[async_trait]
pub trait AuthCodeStore: Send + Sync {
    async fn save(&self, code: AuthorizationCodeRecord) -> StoreResult<()>;

    async fn find(&self, code: &str) -> StoreResult<Option<AuthorizationCodeRecord>>;

    /// Claim the code. Returns true only for the first caller to mark it.
    async fn mark_used(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Remove codes that are used or expired.
    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Issued refresh tokens.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn save(&self, token: RefreshTokenRecord) -> StoreResult<()>;

    async fn find(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Claim the token and record its successor. Returns true only for the first caller.
    async fn mark_used(
        &self,
        token: &str,
        at: DateTime<Utc>,
        rotated_to: Option<&str>,
    ) -> StoreResult<bool>;

    /// Remove tokens that are used or expired.
    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize>;
}

/// Profile data for federated users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn upsert_federated_user(
        &self,
        identity: &FederatedIdentity,
        now: DateTime<Utc>,
    ) -> StoreResult<UserRecord>;

    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    async fn find_email(&self, user_id: &str) -> StoreResult<Option<String>> {
        Ok(self.find(user_id).await?.and_then(|user| user.email))
    }
}

/// Backend selection made at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Volatile process-local maps.
    #[default]
    Memory,
    /// Embedded database at the given directory.
    Durable { path: PathBuf },
}

/// The full set of stores used by the protocol engine.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ClientStore>,
    pub auth_requests: Arc<dyn AuthRequestStore>,
    pub auth_codes: Arc<dyn AuthCodeStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    /// Volatile stores backed by process-local maps.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            clients: Arc::new(memory::InMemoryClientStore::default()),
            auth_requests: Arc::new(memory::InMemoryAuthRequestStore::default()),
            auth_codes: Arc::new(memory::InMemoryAuthCodeStore::default()),
            refresh_tokens: Arc::new(memory::InMemoryRefreshTokenStore::default()),
            users: Arc::new(memory::InMemoryUserDirectory::default()),
        }
    }

    /// Durable stores sharing one embedded database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn durable(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let db = durable::DurableStore::open(path)?;
        Ok(Self {
            clients: Arc::new(db.clients()?),
            auth_requests: Arc::new(db.auth_requests()?),
            auth_codes: Arc::new(db.auth_codes()?),
            refresh_tokens: Arc::new(db.refresh_tokens()?),
            users: Arc::new(db.users()?),
        })
    }

    /// Build the stores for a configured backend.
    ///
    /// # Errors
    ///
    /// Returns error if the durable backend cannot be opened.
    pub fn from_backend(backend: &StoreBackend) -> StoreResult<Self> {
        match backend {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::Durable { path } => Self::durable(path),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish()
    }
}
