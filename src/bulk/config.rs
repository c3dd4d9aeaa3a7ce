// src/bulk/config.rs

use derive_builder::Builder;
use std::time::Duration;

use crate::retry::DEFAULT_BASE_BACKOFF;

pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_ITEMS_PER_BATCH: usize = 25;
pub const DEFAULT_MAX_BATCH_ATTEMPTS: usize = 5;

/// Ingress queue slots per worker.
pub(crate) const INGRESS_SLOTS_PER_WORKER: usize = 10;

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct Config {
    /// Table every write and delete goes to
    pub(crate) table: String,

    /// Number of worker tasks executing batch calls, i.e. max parallel writes
    #[builder(default = "DEFAULT_CONCURRENCY")]
    pub(crate) concurrency: usize,

    /// Maximum writes plus deletes sent in one batch call
    #[builder(default = "DEFAULT_ITEMS_PER_BATCH")]
    pub(crate) items_per_batch: usize,

    /// Backoff a group starts from before its first retry
    #[builder(default = "DEFAULT_BASE_BACKOFF")]
    pub(crate) base_backoff: Duration,

    /// Batch attempts per group before falling back to single-item calls
    #[builder(default = "DEFAULT_MAX_BATCH_ATTEMPTS")]
    pub(crate) max_batch_attempts: usize,

    /// Flush a partial group once its first item has waited this long
    #[builder(default)]
    pub(crate) linger: Option<Duration>,
}

impl Config {
    /// Creates a config for `table` with every other option at its default.
    pub fn new(table: impl Into<String>) -> Self {
        Config {
            table: table.into(),
            concurrency: DEFAULT_CONCURRENCY,
            items_per_batch: DEFAULT_ITEMS_PER_BATCH,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_batch_attempts: DEFAULT_MAX_BATCH_ATTEMPTS,
            linger: None,
        }
    }

    /// Replaces out-of-range values with their defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.concurrency < 1 {
            self.concurrency = DEFAULT_CONCURRENCY;
        }
        if self.items_per_batch < 1 {
            self.items_per_batch = DEFAULT_ITEMS_PER_BATCH;
        }
        if self.max_batch_attempts < 1 {
            self.max_batch_attempts = DEFAULT_MAX_BATCH_ATTEMPTS;
        }
        self
    }

    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[inline]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[inline]
    pub fn items_per_batch(&self) -> usize {
        self.items_per_batch
    }

    #[inline]
    pub fn base_backoff(&self) -> Duration {
        self.base_backoff
    }

    #[inline]
    pub fn max_batch_attempts(&self) -> usize {
        self.max_batch_attempts
    }

    #[inline]
    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    /// Capacity of the ingress queue.
    #[inline]
    pub fn ingress_capacity(&self) -> usize {
        self.concurrency * INGRESS_SLOTS_PER_WORKER
    }
}
