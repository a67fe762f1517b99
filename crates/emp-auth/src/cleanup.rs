//! Reaping of expired requests, spent credentials and inactive clients.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::Stores;

/// Records removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub auth_requests_deleted: usize,
    pub auth_codes_deleted: usize,
    pub refresh_tokens_deleted: usize,
    pub clients_deleted: usize,
}

impl CleanupReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.auth_requests_deleted
            + self.auth_codes_deleted
            + self.refresh_tokens_deleted
            + self.clients_deleted
    }
}

/// Runs the cleanup of every store.
#[derive(Debug, Clone)]
pub struct CleanupSweeper {
    stores: Stores,
    client_inactivity: Duration,
}

impl CleanupSweeper {
    #[must_use]
    pub const fn new(stores: Stores, client_inactivity: Duration) -> Self {
        Self {
            stores,
            client_inactivity,
        }
    }

    /// Remove everything that is expired or spent as of `now`.
    ///
    /// Running it again with no new activity removes nothing.
    pub async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<CleanupReport> {
        let cutoff = chrono::Duration::from_std(self.client_inactivity)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let report = CleanupReport {
            auth_requests_deleted: self.stores.auth_requests.cleanup_expired(now).await?,
            auth_codes_deleted: self.stores.auth_codes.cleanup(now).await?,
            refresh_tokens_deleted: self.stores.refresh_tokens.cleanup(now).await?,
            clients_deleted: self.stores.clients.cleanup_inactive(cutoff).await?,
        };

        if report.total() > 0 {
            tracing::info!(
                auth_requests = report.auth_requests_deleted,
                auth_codes = report.auth_codes_deleted,
                refresh_tokens = report.refresh_tokens_deleted,
                clients = report.clients_deleted,
                "Cleanup sweep removed records"
            );
        }
        Ok(report)
    }

    /// Sweep on a fixed interval in a background task.
    pub fn start_periodic(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(err) = self.sweep(Utc::now()).await {
                    tracing::error!(error = %err, "Cleanup sweep failed");
                }
            }
        })
    }
}
