//! Target-side persistence: the checkpoint log and the document sink.
//!
//! Both contracts are object-safe async traits so orchestrators can hold them
//! as `Arc<dyn ...>` and tests can swap in [`MemoryStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use ergo_core::{Checkpoint, Document, Domain, NaturalKey};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgDocumentStore, UPSERT_CHUNK_SIZE};

pub const CRATE_NAME: &str = "ergo-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Append-only log of completed incremental windows, one stream per domain.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint by `extracted_at`; later insertions win ties.
    async fn get_last(&self, domain: Domain) -> Result<Option<Checkpoint>>;

    async fn put(&self, domain: Domain, checkpoint: &Checkpoint) -> Result<()>;
}

/// Write side of the reporting store.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Merges by natural key into the domain's durable collection.
    ///
    /// Matching documents are replaced whole. An empty batch performs no writes.
    async fn upsert(&self, domain: Domain, documents: &[Document]) -> Result<u64>;

    /// Deletes the domain's realtime mirror, then inserts `documents`.
    ///
    /// The two steps are not atomic; readers may observe an empty mirror in between.
    async fn replace_all(&self, domain: Domain, documents: &[Document]) -> Result<u64>;
}

/// SHA-256 hex digest of the key's canonical JSON array.
pub fn natural_key_hash(key: &NaturalKey) -> Result<String> {
    let bytes = serde_json::to_vec(key)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// A document ready to write, keyed by its natural key hash.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedDocument {
    pub key_hash: String,
    pub natural_key: JsonValue,
    pub body: JsonValue,
}

/// Serializes a batch, collapsing documents that share a natural key.
///
/// The last occurrence wins and keeps the slot of the first one.
pub fn stage_documents(documents: &[Document]) -> Result<Vec<StagedDocument>> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(documents.len());
    let mut staged: Vec<StagedDocument> = Vec::with_capacity(documents.len());
    for doc in documents {
        let key = doc.natural_key();
        let entry = StagedDocument {
            key_hash: natural_key_hash(&key)?,
            natural_key: serde_json::to_value(&key)?,
            body: doc.to_json()?,
        };
        match slots.get(&entry.key_hash) {
            Some(&slot) => staged[slot] = entry,
            None => {
                slots.insert(entry.key_hash.clone(), staged.len());
                staged.push(entry);
            }
        }
    }
    Ok(staged)
}
