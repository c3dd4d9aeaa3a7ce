// src/bulk/worker.rs

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::config::Config;
use super::types::{BulkResult, Group, Message};
use crate::retry::{classify, Backoff, LADDER_BACKOFF_FACTOR};
use crate::store::{StoreClient, StoreError};

/// One member of the worker pool.
///
/// Takes a group at a time and owns it, together with its backoff, until
/// every item in it has been reported.
pub(crate) struct Worker {
    id: usize,
    store: Arc<dyn StoreClient>,
    config: Arc<Config>,
    results: mpsc::Sender<BulkResult>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        store: Arc<dyn StoreClient>,
        config: Arc<Config>,
        results: mpsc::Sender<BulkResult>,
    ) -> Self {
        Self {
            id,
            store,
            config,
            results,
        }
    }

    pub(crate) async fn run(self, groups: Arc<Mutex<mpsc::Receiver<Group>>>) {
        let mut processed = 0usize;
        loop {
            let group = {
                let mut rx = groups.lock().await;
                rx.recv().await
            };
            let Some(group) = group else {
                break;
            };
            self.process(group).await;
            processed += 1;
        }
        tracing::debug!(worker_id = self.id, groups = processed, "worker finished");
    }

    async fn process(&self, group: Group) {
        let mut backoff = Backoff::new(self.config.base_backoff());
        let leftover = self.run_batches(group, &mut backoff).await;
        if !leftover.is_empty() {
            tracing::debug!(
                worker_id = self.id,
                items = leftover.len(),
                "falling back to single-item calls"
            );
            for msg in leftover.into_messages() {
                self.run_single(msg, &mut backoff).await;
            }
        }
    }

    /// Retry ladder over the whole group. Returns whatever is still
    /// outstanding once attempts run out or progress stalls.
    async fn run_batches(&self, mut group: Group, backoff: &mut Backoff) -> Group {
        for attempt in 1..=self.config.max_batch_attempts() {
            let outcome = self
                .store
                .batch_execute(self.config.table(), &group.writes, &group.delete_keys)
                .await;

            match outcome {
                Ok(unprocessed) if unprocessed.is_empty() => {
                    tracing::debug!(
                        worker_id = self.id,
                        items = group.len(),
                        attempt,
                        "group written"
                    );
                    self.emit(BulkResult::success(group)).await;
                    return Group::default();
                }
                Ok(unprocessed) => {
                    let before = group.len();
                    let (done, remaining) = group.split_unprocessed(unprocessed);
                    if !done.is_empty() {
                        self.emit(BulkResult::success(done)).await;
                    }
                    group = remaining;
                    if group.is_empty() {
                        return group;
                    }
                    if group.len() >= before {
                        tracing::debug!(
                            worker_id = self.id,
                            unprocessed = group.len(),
                            attempt,
                            "batch made no progress"
                        );
                        return group;
                    }
                    backoff.wait(LADDER_BACKOFF_FACTOR).await;
                }
                Err(err) => {
                    if !classify(&err).is_retryable() {
                        tracing::error!(
                            worker_id = self.id,
                            items = group.len(),
                            error = %err,
                            "batch failed"
                        );
                        self.emit(BulkResult::failure(group, err)).await;
                        return Group::default();
                    }
                    tracing::warn!(
                        worker_id = self.id,
                        attempt,
                        backoff_ms = backoff.current().as_millis() as u64,
                        error = %err,
                        "batch call failed, backing off"
                    );
                    backoff.wait(LADDER_BACKOFF_FACTOR).await;
                }
            }
        }
        group
    }

    /// Pushes one item through the single-item API until it lands or fails
    /// terminally. Keeps growing the backoff inherited from the batch phase.
    async fn run_single(&self, msg: Message, backoff: &mut Backoff) {
        loop {
            let outcome = self.store_one(&msg).await;
            let err = match outcome {
                Ok(()) => {
                    self.emit(BulkResult::success(Group::from(msg))).await;
                    return;
                }
                Err(err) => err,
            };

            if !classify(&err).is_retryable() {
                tracing::error!(worker_id = self.id, error = %err, "item failed");
                self.emit(BulkResult::failure(Group::from(msg), err)).await;
                return;
            }
            tracing::warn!(
                worker_id = self.id,
                backoff_ms = backoff.current().as_millis() as u64,
                error = %err,
                "single-item call failed, backing off"
            );
            backoff.wait(LADDER_BACKOFF_FACTOR).await;
        }
    }

    async fn store_one(&self, msg: &Message) -> Result<(), StoreError> {
        let table = self.config.table();
        match msg {
            Message::Write(doc) => self.store.put_one(table, doc).await,
            Message::Delete(key) => self.store.delete_one(table, key).await,
        }
    }

    async fn emit(&self, result: BulkResult) {
        if self.results.send(result).await.is_err() {
            tracing::trace!(worker_id = self.id, "result stream dropped, discarding result");
        }
    }
}
