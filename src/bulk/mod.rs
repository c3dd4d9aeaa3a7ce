mod batcher;
pub mod config;
pub mod types;
mod worker;
pub mod writer;

pub use config::{Config, ConfigBuilder};
pub use types::{BulkError, BulkResult, Message};
pub use writer::{BulkWriter, ResultStream};

#[cfg(test)]
mod tests;
