//! In-memory stores: one `RwLock<HashMap>` per entity, records cloned out on
//! read. Claims happen under the write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AuthCodeStore, AuthRequestStore, ClientStore, RefreshTokenStore, UserDirectory};
use crate::error::StoreResult;
use crate::models::{
    AuthRequestRecord, AuthorizationCodeRecord, ClientRecord, FederatedIdentity,
    RefreshTokenRecord, UserRecord,
};

/// A keyed table of records behind a single lock.
struct Table<T> {
    rows: RwLock<HashMap<String, T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Table<T> {
    async fn insert(&self, key: String, row: T) {
        self.rows.write().await.insert(key, row);
    }

    async fn get(&self, key: &str) -> Option<T> {
        self.rows.read().await.get(key).cloned()
    }

    async fn remove(&self, key: &str) -> bool {
        self.rows.write().await.remove(key).is_some()
    }

    /// Apply `update` under the write lock; returns its verdict, false for a missing row.
    async fn update(&self, key: &str, update: impl FnOnce(&mut T) -> bool) -> bool {
        let mut rows = self.rows.write().await;
        rows.get_mut(key).is_some_and(update)
    }

    /// Remove every row matching `expired`, returning how many were removed.
    async fn purge(&self, expired: impl Fn(&T) -> bool) -> usize {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| !expired(row));
        before - rows.len()
    }
}

/// Volatile client registry.
#[derive(Default)]
pub struct InMemoryClientStore {
    clients: Table<ClientRecord>,
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn save(&self, client: ClientRecord) -> StoreResult<()> {
        self.clients.insert(client.client_id.clone(), client).await;
        Ok(())
    }

    async fn find(&self, client_id: &str) -> StoreResult<Option<ClientRecord>> {
        Ok(self.clients.get(client_id).await)
    }

    async fn update_last_used_at(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.clients
            .update(client_id, |client| {
                client.last_used_at = Some(at);
                true
            })
            .await;
        Ok(())
    }

    async fn cleanup_inactive(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.clients.purge(|client| client.last_activity() < cutoff).await)
    }
}

/// Volatile pending-request tracker.
#[derive(Default)]
pub struct InMemoryAuthRequestStore {
    requests: Table<AuthRequestRecord>,
}

#[async_trait]
impl AuthRequestStore for InMemoryAuthRequestStore {
    async fn save(&self, request: AuthRequestRecord) -> StoreResult<()> {
        self.requests.insert(request.id.clone(), request).await;
        Ok(())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<AuthRequestRecord>> {
        Ok(self.requests.get(id).await)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.requests.remove(id).await)
    }

    async fn update_user_id(&self, id: &str, user_id: &str) -> StoreResult<bool> {
        Ok(self
            .requests
            .update(id, |request| {
                request.user_id = Some(user_id.to_owned());
                true
            })
            .await)
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.requests.purge(|request| request.expires_at < now).await)
    }
}

/// Volatile authorization-code ledger.
#[derive(Default)]
pub struct InMemoryAuthCodeStore {
    codes: Table<AuthorizationCodeRecord>,
}

#[async_trait]
impl AuthCodeStore for InMemoryAuthCodeStore {
    async fn save(&self, code: AuthorizationCodeRecord) -> StoreResult<()> {
        self.codes.insert(code.code.clone(), code).await;
        Ok(())
    }

    async fn find(&self, code: &str) -> StoreResult<Option<AuthorizationCodeRecord>> {
        Ok(self.codes.get(code).await)
    }

    async fn mark_used(&self, code: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self
            .codes
            .update(code, |record| {
                if record.is_used() {
                    return false;
                }
                record.used_at = Some(at);
                true
            })
            .await)
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self.codes.purge(|code| code.is_used() || code.expires_at < now).await;
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up used or expired authorization codes");
        }
        Ok(removed)
    }
}

/// Volatile refresh-token ledger.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Table<RefreshTokenRecord>,
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn save(&self, token: RefreshTokenRecord) -> StoreResult<()> {
        self.tokens.insert(token.token.clone(), token).await;
        Ok(())
    }

    async fn find(&self, token: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        Ok(self.tokens.get(token).await)
    }

    async fn mark_used(
        &self,
        token: &str,
        at: DateTime<Utc>,
        rotated_to: Option<&str>,
    ) -> StoreResult<bool> {
        Ok(self
            .tokens
            .update(token, |record| {
                if record.is_used() {
                    return false;
                }
                record.used_at = Some(at);
                record.rotated_to = rotated_to.map(str::to_owned);
                true
            })
            .await)
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self.tokens.purge(|token| token.is_used() || token.expires_at < now).await;
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up used or expired refresh tokens");
        }
        Ok(removed)
    }
}

/// Volatile user directory.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn upsert_federated_user(
        &self,
        identity: &FederatedIdentity,
        now: DateTime<Utc>,
    ) -> StoreResult<UserRecord> {
        let mut users = self.users.write().await;
        let existing = users.remove(&identity.subject);
        let user = UserRecord::merge_login(existing, identity, now);
        users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    async fn find(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}
