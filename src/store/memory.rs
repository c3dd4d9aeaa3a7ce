// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::client::StoreClient;
use super::types::{Document, ErrorKind, StoreError, Unprocessed};

/// Largest batch the store accepts in one call.
pub const DEFAULT_BATCH_LIMIT: usize = 25;

type Table = HashMap<Document, Document>;

/// In-process [`StoreClient`] holding every table in memory.
///
/// Items are keyed by the configured key attributes, mirroring how the real
/// store identifies an item. Batches over the limit are rejected with a
/// validation error, just like the remote service.
pub struct MemoryStore {
    key_attributes: Vec<String>,
    batch_limit: usize,
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new<I, S>(key_attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_attributes: key_attributes.into_iter().map(Into::into).collect(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Fetches an item by key.
    pub async fn get(&self, table: &str, key: &Document) -> Option<Document> {
        let key = self.key_of(key).ok()?;
        self.tables.lock().await.get(table)?.get(&key).cloned()
    }

    /// Number of items stored in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables.lock().await.get(table).map_or(0, HashMap::len)
    }

    fn key_of(&self, doc: &Document) -> Result<Document, StoreError> {
        doc.project(&self.key_attributes).ok_or_else(|| {
            StoreError::classified(
                ErrorKind::Validation,
                format!("item is missing key attributes {:?}", self.key_attributes),
            )
        })
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn batch_execute(
        &self,
        table: &str,
        writes: &[Document],
        delete_keys: &[Document],
    ) -> Result<Unprocessed, StoreError> {
        let count = writes.len() + delete_keys.len();
        if count == 0 || count > self.batch_limit {
            return Err(StoreError::classified(
                ErrorKind::Validation,
                format!("batch must hold 1 to {} items, got {count}", self.batch_limit),
            ));
        }

        // Validate everything first so a bad item rejects the whole call.
        let puts = writes
            .iter()
            .map(|doc| Ok((self.key_of(doc)?, doc.clone())))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let deletes = delete_keys
            .iter()
            .map(|key| self.key_of(key))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut tables = self.tables.lock().await;
        let items = tables.entry(table.to_owned()).or_default();
        items.extend(puts);
        for key in &deletes {
            items.remove(key);
        }
        Ok(Unprocessed::none())
    }

    async fn put_one(&self, table: &str, doc: &Document) -> Result<(), StoreError> {
        let key = self.key_of(doc)?;
        let mut tables = self.tables.lock().await;
        tables
            .entry(table.to_owned())
            .or_default()
            .insert(key, doc.clone());
        Ok(())
    }

    async fn delete_one(&self, table: &str, key: &Document) -> Result<(), StoreError> {
        let key = self.key_of(key)?;
        if let Some(items) = self.tables.lock().await.get_mut(table) {
            items.remove(&key);
        }
        Ok(())
    }
}
