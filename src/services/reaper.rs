//! Background collection of expired files.
//!
//! Each pass walks every reapable row once, deleting the payload before
//! the row. A row whose payload could not be deleted stays in place and is
//! retried on the next pass.

use crate::{
    config::ReaperConfig,
    services::file_repository::FileRepository,
    storage::StorageProvider,
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of one reaper pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct ExpiryReaper {
    storage: Arc<dyn StorageProvider>,
    repo: FileRepository,
    batch_size: u32,
    stale_claim_after: Duration,
}

impl ExpiryReaper {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repo: FileRepository,
        config: &ReaperConfig,
    ) -> Self {
        Self {
            storage,
            repo,
            batch_size: config.batch_size.max(1),
            stale_claim_after: config.stale_claim_after,
        }
    }

    /// Collect everything that is reapable right now.
    pub async fn run_once(&self) -> ReapReport {
        let now = Utc::now();
        let stale_before = now
            - chrono::Duration::from_std(self.stale_claim_after)
                .unwrap_or_else(|_| chrono::Duration::days(1));
        let mut report = ReapReport::default();
        let mut cursor = None;

        loop {
            let batch = match self
                .repo
                .list_reapable(now, stale_before, cursor, self.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(error = %err, "reaper query failed");
                    break;
                }
            };
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            let full_batch = batch.len() as u32 == self.batch_size;

            for file in batch {
                if let Err(err) = self.storage.delete(&file.storage_key).await {
                    tracing::warn!(
                        file_id = %file.id,
                        backend = self.storage.kind(),
                        error = %err,
                        "reaper could not delete payload, keeping row"
                    );
                    report.failed += 1;
                    continue;
                }
                match self.repo.delete(file.id).await {
                    Ok(_) => {
                        tracing::debug!(file_id = %file.id, code = %file.access_code, "reaped");
                        report.deleted += 1;
                    }
                    Err(err) => {
                        tracing::error!(file_id = %file.id, error = %err, "reaper could not delete row");
                        report.failed += 1;
                    }
                }
            }

            if !full_batch {
                break;
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            tracing::info!(deleted = report.deleted, failed = report.failed, "reaper pass finished");
        }
        report
    }

    /// Run a pass immediately and then every `interval` until `shutdown` fires.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("reaper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
