pub mod autoretry;
pub mod client;
pub mod memory;
pub mod types;

pub use autoretry::AutoRetry;
pub use client::StoreClient;
pub use memory::MemoryStore;
pub use types::{AttributeValue, ClassifiedError, Document, ErrorKind, StoreError, Unprocessed};
