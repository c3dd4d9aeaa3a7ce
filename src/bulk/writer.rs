// src/bulk/writer.rs

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::batcher::Batcher;
use super::config::Config;
use super::types::{BulkError, BulkResult, Message};
use super::worker::Worker;
use crate::store::{Document, StoreClient};

/// Loads writes and deletes into a table through concurrent batch calls.
///
/// Submissions queue up in a bounded buffer; a batcher task packs them into
/// groups and a pool of workers sends each group to the store, retrying
/// throttled calls and falling back to single-item calls for items the store
/// keeps handing back.
///
/// The [`ResultStream`] must be drained while writing. Workers block on it,
/// so an unread stream eventually blocks [`write`](BulkWriter::write) too.
///
/// ```rust,ignore
/// let writer = BulkWriter::new(store, Config::new("people"));
/// let mut results = writer.results()?;
/// let reader = tokio::spawn(async move {
///     while let Some(result) = results.recv().await {
///         if let Some(err) = &result.error {
///             tracing::error!(error = %err, items = result.len(), "write failed");
///         }
///     }
/// });
///
/// for i in 0..1000 {
///     writer.write(Document::new().with("Id", i)).await?;
/// }
/// writer.close_wait().await?;
/// reader.await?;
/// ```
pub struct BulkWriter {
    config: Arc<Config>,
    ingress: mpsc::Sender<Message>,
    results: std::sync::Mutex<Option<mpsc::Receiver<BulkResult>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    done: CancellationToken,
    closed: AtomicBool,
}

impl BulkWriter {
    /// Creates the writer and spawns the batcher and worker tasks.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(store: Arc<dyn StoreClient>, config: Config) -> Self {
        let config = Arc::new(config.normalized());
        let (ingress, ingress_rx) = mpsc::channel(config.ingress_capacity());
        let (groups_tx, groups_rx) = mpsc::channel(1);
        let (results_tx, results_rx) = mpsc::channel(1);
        let done = CancellationToken::new();

        let batcher = Batcher::new(
            ingress_rx,
            groups_tx,
            done.clone(),
            config.items_per_batch(),
            config.linger(),
        );
        let mut handles = Vec::with_capacity(config.concurrency() + 1);
        handles.push(tokio::spawn(batcher.run()));

        let groups_rx = Arc::new(Mutex::new(groups_rx));
        for worker_id in 0..config.concurrency() {
            let worker = Worker::new(
                worker_id,
                store.clone(),
                config.clone(),
                results_tx.clone(),
            );
            handles.push(tokio::spawn(worker.run(groups_rx.clone())));
        }

        tracing::debug!(
            table = config.table(),
            concurrency = config.concurrency(),
            items_per_batch = config.items_per_batch(),
            "bulk writer started"
        );

        Self {
            config,
            ingress,
            results: std::sync::Mutex::new(Some(results_rx)),
            tasks: Mutex::new(handles),
            done,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queues a document to be written.
    ///
    /// Safe to call from many tasks at once. Waits while the queue is full.
    pub async fn write(&self, doc: Document) -> Result<(), BulkError> {
        self.submit(Message::Write(doc)).await
    }

    /// Queues the item identified by `key` for deletion.
    pub async fn delete(&self, key: Document) -> Result<(), BulkError> {
        self.submit(Message::Delete(key)).await
    }

    async fn submit(&self, msg: Message) -> Result<(), BulkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BulkError::Closed);
        }
        self.ingress.send(msg).await.map_err(|_| BulkError::Closed)
    }

    /// Hands out the result stream. Only the first call succeeds.
    pub fn results(&self) -> Result<ResultStream, BulkError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|rx| ResultStream { rx })
            .ok_or(BulkError::ResultsTaken)
    }

    /// Stops accepting work and waits until every queued item is reported.
    ///
    /// The result stream ends once this returns. May only be called once;
    /// later calls fail with [`BulkError::AlreadyClosed`].
    pub async fn close_wait(&self) -> Result<(), BulkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BulkError::AlreadyClosed);
        }
        self.done.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let mut errors = Vec::new();
        for handle in handles {
            if let Err(e) = handle.await {
                errors.push(BulkError::TaskFailed(e.to_string()));
            }
        }

        tracing::debug!(table = self.config.table(), "bulk writer closed");
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(BulkError::MultipleErrors(errors)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for BulkWriter {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                table = self.config.table(),
                "bulk writer dropped without close_wait, pending results may be lost"
            );
        }
    }
}

/// Outcomes of a [`BulkWriter`], in completion order.
///
/// Ends after [`BulkWriter::close_wait`] has drained the pipeline.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<BulkResult>,
}

impl ResultStream {
    pub async fn recv(&mut self) -> Option<BulkResult> {
        self.rx.recv().await
    }
}

impl Stream for ResultStream {
    type Item = BulkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
