//! Durable stores backed by an embedded `sled` database.
//!
//! Each entity lives in its own tree as JSON-serialised records keyed by
//! identifier. Single-use claims are `compare_and_swap` loops, so two
//! processes or tasks racing on the same record still see one winner.

use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::{Db, Tree};

use super::{AuthCodeStore, AuthRequestStore, ClientStore, RefreshTokenStore, UserDirectory};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AuthRequestRecord, AuthorizationCodeRecord, ClientRecord, FederatedIdentity,
    RefreshTokenRecord, UserRecord,
};

const CLIENTS_TREE: &str = "clients";
const AUTH_REQUESTS_TREE: &str = "auth_requests";
const AUTH_CODES_TREE: &str = "auth_codes";
const REFRESH_TOKENS_TREE: &str = "refresh_tokens";
const USERS_TREE: &str = "users";

/// Handle to the embedded database holding every durable store.
#[derive(Clone)]
pub struct DurableStore {
    db: Db,
}

impl DurableStore {
    /// Open or create the database directory.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StoreError::Backend(format!("failed to open {}: {e}", path.as_ref().display()))
        })?;
        Ok(Self { db })
    }

    fn tree<T>(&self, name: &str) -> StoreResult<JsonTree<T>> {
        Ok(JsonTree {
            tree: self.db.open_tree(name)?,
            _record: PhantomData,
        })
    }

    pub fn clients(&self) -> StoreResult<DurableClientStore> {
        Ok(DurableClientStore {
            clients: self.tree(CLIENTS_TREE)?,
        })
    }

    pub fn auth_requests(&self) -> StoreResult<DurableAuthRequestStore> {
        Ok(DurableAuthRequestStore {
            requests: self.tree(AUTH_REQUESTS_TREE)?,
        })
    }

    pub fn auth_codes(&self) -> StoreResult<DurableAuthCodeStore> {
        Ok(DurableAuthCodeStore {
            codes: self.tree(AUTH_CODES_TREE)?,
        })
    }

    pub fn refresh_tokens(&self) -> StoreResult<DurableRefreshTokenStore> {
        Ok(DurableRefreshTokenStore {
            tokens: self.tree(REFRESH_TOKENS_TREE)?,
        })
    }

    pub fn users(&self) -> StoreResult<DurableUserDirectory> {
        Ok(DurableUserDirectory {
            users: self.tree(USERS_TREE)?,
        })
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

/// A sled tree of JSON records of one type.
struct JsonTree<T> {
    tree: Tree,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonTree<T> {
    async fn put(&self, key: &str, record: &T) -> StoreResult<()> {
        self.tree.insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<T>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a record. Returns true only for the caller that removed it.
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed = self.tree.remove(key.as_bytes())?.is_some();
        if removed {
            self.tree.flush_async().await?;
        }
        Ok(removed)
    }

    /// Conditionally rewrite a record. `update` returns false to leave it untouched.
    ///
    /// Retries when another writer changed the record between read and swap.
    async fn update(&self, key: &str, mut update: impl FnMut(&mut T) -> bool) -> StoreResult<bool> {
        loop {
            let Some(current) = self.tree.get(key.as_bytes())? else {
                return Ok(false);
            };
            let mut record: T = serde_json::from_slice(&current)?;
            if !update(&mut record) {
                return Ok(false);
            }
            let next = serde_json::to_vec(&record)?;
            if self.tree.compare_and_swap(key.as_bytes(), Some(&current), Some(next))?.is_ok() {
                self.tree.flush_async().await?;
                return Ok(true);
            }
        }
    }

    /// Remove every record matching `expired`. A record rewritten concurrently is kept.
    async fn purge(&self, expired: impl Fn(&T) -> bool) -> StoreResult<usize> {
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let record: T = serde_json::from_slice(&value)?;
            if expired(&record)
                && self.tree.compare_and_swap(&key, Some(&value), None::<Vec<u8>>)?.is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            self.tree.flush_async().await?;
        }
        Ok(removed)
    }
}

/// Durable client registry.
pub struct DurableClientStore {
    clients: JsonTree<ClientRecord>,
}

#[async_trait]
impl ClientStore for DurableClientStore {
    async fn save(&self, client: ClientRecord) -> StoreResult<()> {
        self.clients.put(&client.client_id, &client).await
    }

    async fn find(&self, client_id: &str) -> StoreResult<Option<ClientRecord>> {
        self.clients.get(client_id)
    }

    async fn update_last_used_at(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.clients
            .update(client_id, |client| {
                client.last_used_at = Some(at);
                true
            })
            .await?;
        Ok(())
    }

    async fn cleanup_inactive(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.clients.purge(|client| client.last_activity() < cutoff).await
    }
}

/// Durable pending-request tracker.
pub struct DurableAuthRequestStore {
    requests: JsonTree<AuthRequestRecord>,
}

#[async_trait]
impl AuthRequestStore for DurableAuthRequestStore {
    async fn save(&self, request: AuthRequestRecord) -> StoreResult<()> {
        self.requests.put(&request.id, &request).await
    }

    async fn find(&self, id: &str) -> StoreResult<Option<AuthRequestRecord>> {
        self.requests.get(id)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.requests.delete(id).await
    }

    async fn update_user_id(&self, id: &str, user_id: &str) -> StoreResult<bool> {
        self.requests
            .update(id, |request| {
                request.user_id = Some(user_id.to_owned());
                true
            })
            .await
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.requests.purge(|request| request.expires_at < now).await
    }
}

/// Durable authorization-code ledger.
pub struct DurableAuthCodeStore {
    codes: JsonTree<AuthorizationCodeRecord>,
}

#[async_trait]
impl AuthCodeStore for DurableAuthCodeStore {
    async fn save(&self, code: AuthorizationCodeRecord) -> StoreResult<()> {
        self.codes.put(&code.code, &code).await
    }

    async fn find(&self, code: &str) -> StoreResult<Option<AuthorizationCodeRecord>> {
        self.codes.get(code)
    }

    async fn mark_used(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        self.codes
            .update(code, |record| {
                if record.is_used() {
                    return false;
                }
                record.used_at = Some(at);
                true
            })
            .await
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.codes.purge(|code| code.is_used() || code.expires_at < now).await
    }
}

/// Durable refresh-token ledger.
pub struct DurableRefreshTokenStore {
    tokens: JsonTree<RefreshTokenRecord>,
}

#[async_trait]
impl RefreshTokenStore for DurableRefreshTokenStore {
    async fn save(&self, token: RefreshTokenRecord) -> StoreResult<()> {
        self.tokens.put(&token.token, &token).await
    }

    async fn find(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        self.tokens.get(token)
    }

    async fn mark_used(
        &self,
        token: &str,
        at: DateTime<Utc>,
        rotated_to: Option<&str>,
    ) -> StoreResult<bool> {
        self.tokens
            .update(token, |record| {
                if record.is_used() {
                    return false;
                }
                record.used_at = Some(at);
                record.rotated_to = rotated_to.map(str::to_owned);
                true
            })
            .await
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.tokens.purge(|token| token.is_used() || token.expires_at < now).await
    }
}

/// Durable user directory.
pub struct DurableUserDirectory {
    users: JsonTree<UserRecord>,
}

#[async_trait]
impl UserDirectory for DurableUserDirectory {
    async fn upsert_federated_user(
        &self,
        identity: &FederatedIdentity,
        now: DateTime<Utc>,
    ) -> StoreResult<UserRecord> {
        let user = UserRecord::merge_login(self.users.get(&identity.subject)?, identity, now);
        self.users.put(&user.user_id, &user).await?;
        Ok(user)
    }

    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        self.users.get(user_id)
    }
}
