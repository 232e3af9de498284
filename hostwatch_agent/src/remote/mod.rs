//! Object storage seam used by the synchronizer.

mod memory;
mod s3;

pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist. Distinct from every other failure so a first
    /// upload can be told apart from a broken bucket.
    #[error("object {0} not found")]
    NotFound(String),
    #[error("{op} {key}: {message}")]
    Other {
        op: &'static str,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn other(op: &'static str, key: &str, message: impl ToString) -> Self {
        StoreError::Other {
            op,
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Number of objects under `prefix`, counting at most `limit`.
    async fn count_prefix(&self, prefix: &str, limit: i32) -> Result<usize, StoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;
    /// Full overwrite.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError>;
}
