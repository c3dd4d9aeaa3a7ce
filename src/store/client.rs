// src/store/client.rs

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Document, StoreError, Unprocessed};

/// Transport to the document store.
///
/// Implementations own the wire protocol, request signing and credentials.
/// The bulk writer only relies on the partial-failure contract: a successful
/// batch call may still hand back items it did not persist.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Executes one batched call carrying both puts and deletes.
    async fn batch_execute(
        &self,
        table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError>;

    /// Writes a single document.
    async fn put_one(&self, table: &str, doc: &Document) -> Result<(), StoreError>;

    /// Deletes the item identified by `key`.
    async fn delete_one(&self, table: &str, key: &Document) -> Result<(), StoreError>;
}

#[async_trait]
impl<C> StoreClient for Arc<C>
where
    C: StoreClient + ?Sized,
{
    async fn batch_execute(
        &self,
        table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        (**self).batch_execute(table, writes, delete_keys).await
    }

    async fn put_one(&self, table: &str, doc: &Document) -> Result<(), StoreError> {
        (**self).put_one(table, doc).await
    }

    async fn delete_one(&self, table: &str, key: &Document) -> Result<(), StoreError> {
        (**self).delete_one(table, key).await
    }
}
