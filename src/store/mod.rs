// Document store for rate-limit counters and stored leads. Documents are JSON
// objects addressed by (collection, id); `transact` reads, decides and writes
// back as one atomic unit per key.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// Field stamped by `insert` with the store's clock (epoch ms)
pub const CREATED_AT_FIELD: &str = "createdAt";
// Documents carrying this field (epoch ms) are removed by `purge_expired`
pub const EXPIRE_AT_FIELD: &str = "expireAt";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored document is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("document must be a JSON object")]
    NotAnObject,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// What a transaction callback wants done with the document it was shown
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Put(Value),
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    Written(Value),
    Aborted,
}

// Owned so a blocking backend can move it onto its own thread
pub type Apply = Box<dyn FnOnce(Option<&Value>) -> Transition + Send>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Concurrent calls for the same key are linearized, none of their writes is lost
    async fn transact(
        &self,
        collection: &str,
        id: &str,
        apply: Apply,
    ) -> Result<Committed, StoreError>;

    // Adds a document under a generated id, stamping `createdAt`
    async fn insert(&self, collection: &str, document: Value) -> Result<String, StoreError>;

    #[cfg(test)]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    // Deletes documents whose `expireAt` lies before `now_ms`, returns how many went
    async fn purge_expired(&self, collection: &str, now_ms: i64) -> Result<u64, StoreError>;
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

// 20 hex chars of sha256(collection + sequence + clock)
pub(crate) fn document_id(collection: &str) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(collection);
    hasher.update(seq.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..20].to_string()
}

pub(crate) fn stamp_created_at(mut document: Value, now_ms: i64) -> Result<Value, StoreError> {
    let fields = document.as_object_mut().ok_or(StoreError::NotAnObject)?;
    fields.insert(CREATED_AT_FIELD.to_string(), Value::from(now_ms));
    Ok(document)
}

pub(crate) fn expire_at(document: &Value) -> Option<i64> {
    document.get(EXPIRE_AT_FIELD).and_then(Value::as_i64)
}
