//! Delayed deletion of burn-after-read files.
//!
//! A download that finishes streaming hands its file to the scheduler,
//! which deletes the payload and then the row after a short grace delay.
//! The worker owns a [`DelayQueue`]; callers talk to it over a channel.
//! Deletion is best effort: if the process stops first, the claimed row
//! outlives the claim timeout and the reaper collects it.

use crate::{services::file_repository::FileRepository, storage::StorageProvider};
use dashmap::DashMap;
use futures::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{
    sync::CancellationToken,
    time::{DelayQueue, delay_queue},
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct BurnJob {
    file_id: Uuid,
    storage_key: String,
}

#[derive(Debug)]
enum Command {
    Schedule(BurnJob),
    Cancel(Uuid),
}

#[derive(Clone)]
pub struct BurnScheduler {
    tx: mpsc::UnboundedSender<Command>,
    pending: Arc<DashMap<Uuid, ()>>,
    grace: Duration,
}

impl BurnScheduler {
    /// Start the worker. It stops when `shutdown` fires, deleting whatever
    /// is still queued first.
    pub fn spawn(
        storage: Arc<dyn StorageProvider>,
        repo: FileRepository,
        grace: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        let worker = Worker {
            storage,
            repo,
            pending: pending.clone(),
            grace,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown));
        (Self { tx, pending, grace }, handle)
    }

    /// Queue `file_id` for deletion after the grace delay.
    pub fn schedule(&self, file_id: Uuid, storage_key: &str) {
        self.pending.insert(file_id, ());
        let job = BurnJob {
            file_id,
            storage_key: storage_key.to_string(),
        };
        if self.tx.send(Command::Schedule(job)).is_err() {
            self.pending.remove(&file_id);
            tracing::warn!(file_id = %file_id, "burn scheduler stopped, leaving file to the reaper");
        } else {
            tracing::debug!(file_id = %file_id, grace_ms = self.grace.as_millis() as u64, "burn scheduled");
        }
    }

    /// Drop a queued deletion. Returns whether one was pending.
    pub fn cancel(&self, file_id: Uuid) -> bool {
        let removed = self.pending.remove(&file_id).is_some();
        if removed {
            let _ = self.tx.send(Command::Cancel(file_id));
        }
        removed
    }

    /// Number of deletions waiting for their grace delay.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

struct Worker {
    storage: Arc<dyn StorageProvider>,
    repo: FileRepository,
    pending: Arc<DashMap<Uuid, ()>>,
    grace: Duration,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>, shutdown: CancellationToken) {
        let mut queue: DelayQueue<BurnJob> = DelayQueue::new();
        let mut keys: HashMap<Uuid, delay_queue::Key> = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(Command::Schedule(job)) => {
                        if let Some(old) = keys.remove(&job.file_id) {
                            queue.remove(&old);
                        }
                        let id = job.file_id;
                        keys.insert(id, queue.insert(job, self.grace));
                    }
                    Some(Command::Cancel(id)) => {
                        if let Some(key) = keys.remove(&id) {
                            queue.remove(&key);
                            tracing::debug!(file_id = %id, "burn cancelled");
                        }
                    }
                    None => break,
                },
                Some(expired) = queue.next(), if !queue.is_empty() => {
                    let job = expired.into_inner();
                    keys.remove(&job.file_id);
                    self.burn(job).await;
                }
            }
        }

        let remaining: Vec<BurnJob> = keys
            .drain()
            .map(|(_, key)| queue.remove(&key).into_inner())
            .collect();
        if !remaining.is_empty() {
            tracing::info!(count = remaining.len(), "flushing queued burns before shutdown");
        }
        for job in remaining {
            self.burn(job).await;
        }
        tracing::debug!("burn scheduler stopped");
    }

    async fn burn(&self, job: BurnJob) {
        if self.pending.remove(&job.file_id).is_none() {
            return;
        }
        if let Err(err) = self.storage.delete(&job.storage_key).await {
            tracing::error!(
                file_id = %job.file_id,
                backend = self.storage.kind(),
                error = %err,
                "burn-after-read storage delete failed"
            );
            return;
        }
        match self.repo.delete(job.file_id).await {
            Ok(_) => tracing::info!(file_id = %job.file_id, "burn-after-read file destroyed"),
            Err(err) => tracing::error!(
                file_id = %job.file_id,
                error = %err,
                "burn-after-read row delete failed"
            ),
        }
    }
}
