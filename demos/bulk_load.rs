//! Bulk load example against the in-memory store, with simulated throttling.
//!
//! Run with: cargo run --example bulk_load

use async_trait::async_trait;
use bulk_rust::bulk::{BulkWriter, ConfigBuilder};
use bulk_rust::observability::init_tracing;
use bulk_rust::store::{
    Document, ErrorKind, MemoryStore, StoreClient, StoreError, Unprocessed,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rejects every seventh batch call as if the table ran out of capacity.
struct ThrottlingStore {
    inner: Arc<MemoryStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl StoreClient for ThrottlingStore {
    async fn batch_execute(
        &self,
        table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 7 == 6 {
            return Err(StoreError::classified(
                ErrorKind::ThroughputExceeded,
                "provisioned throughput exceeded",
            ));
        }
        self.inner.batch_execute(table, writes, delete_keys).await
    }

    async fn put_one(&self, table: &str, doc: &Document) -> Result<(), StoreError> {
        self.inner.put_one(table, doc).await
    }

    async fn delete_one(&self, table: &str, key: &Document) -> Result<(), StoreError> {
        self.inner.delete_one(table, key).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info,bulk_rust=debug");

    let memory = Arc::new(MemoryStore::new(["Id"]));
    let store = Arc::new(ThrottlingStore {
        inner: memory.clone(),
        calls: AtomicUsize::new(0),
    });

    let config = ConfigBuilder::default()
        .table("people")
        .concurrency(4usize)
        .base_backoff(Duration::from_millis(20))
        .build()?;

    let writer = BulkWriter::new(store, config);

    // Results must be drained while writing, or the workers stall.
    let mut results = writer.results()?;
    let reader = tokio::spawn(async move {
        let (mut written, mut failed) = (0usize, 0usize);
        while let Some(result) = results.recv().await {
            match &result.error {
                Some(err) => {
                    failed += result.len();
                    tracing::error!(error = %err, items = result.len(), "write failed");
                }
                None => written += result.len(),
            }
        }
        (written, failed)
    });

    for i in 0..1000u32 {
        writer
            .write(Document::new().with("Id", i).with("Name", format!("User{i}")))
            .await?;
    }
    for i in (0..1000u32).step_by(10) {
        writer.delete(Document::new().with("Id", i)).await?;
    }

    writer.close_wait().await?;
    let (written, failed) = reader.await?;

    println!("Processed {written} items, {failed} failed");
    println!("Table now holds {} items", memory.len("people").await);
    Ok(())
}
