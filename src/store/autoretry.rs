// src/store/autoretry.rs

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::client::StoreClient;
use super::types::{Document, StoreError, Unprocessed};
use crate::retry::{classify, Backoff};

/// Initial delay between request-level retries.
pub const AUTO_RETRY_BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Retries each individual request against the wrapped client.
///
/// Sits below the bulk writer: throttled or transient failures are retried
/// here first, with their own short backoff, before the writer's group-level
/// ladder ever sees them. Terminal errors pass through untouched.
pub struct AutoRetry<C> {
    inner: C,
    max_retries: u32,
    base_backoff: Duration,
}

impl<C> AutoRetry<C>
where
    C: StoreClient,
{
    pub fn new(inner: C, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff: AUTO_RETRY_BASE_BACKOFF,
        }
    }

    pub fn with_base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn run<'f, T, F>(&self, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> BoxFuture<'f, Result<T, StoreError>>,
    {
        let mut backoff = Backoff::new(self.base_backoff);
        let mut retries = 0;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(factor) = classify(&err).backoff_factor() else {
                return Err(err);
            };
            if retries >= self.max_retries {
                return Err(err);
            }
            retries += 1;
            tracing::debug!(
                retries,
                backoff_ms = backoff.current().as_millis() as u64,
                error = %err,
                "retrying store request"
            );
            backoff.wait(factor).await;
        }
    }
}

#[async_trait]
impl<C> StoreClient for AutoRetry<C>
where
    C: StoreClient,
{
    async fn batch_execute(
        &self,
        table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        self.run(move || self.inner.batch_execute(table, writes, delete_keys))
            .await
    }

    async fn put_one(&self, table: &str, doc: &Document) -> Result<(), StoreError> {
        self.run(move || self.inner.put_one(table, doc)).await
    }

    async fn delete_one(&self, table: &str, key: &Document) -> Result<(), StoreError> {
        self.run(move || self.inner.delete_one(table, key)).await
    }
}
