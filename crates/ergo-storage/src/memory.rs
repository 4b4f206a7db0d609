//! In-process store implementing both storage traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ergo_core::{Checkpoint, Document, Domain};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{stage_documents, CheckpointStore, DocumentSink, Result, StorageError};

#[derive(Debug, Default)]
struct MemoryState {
    durable: BTreeMap<Domain, BTreeMap<String, JsonValue>>,
    realtime: BTreeMap<Domain, Vec<JsonValue>>,
    checkpoints: BTreeMap<Domain, Vec<Checkpoint>>,
    failing_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StorageError::Unavailable`].
    pub async fn set_failing_writes(&self, failing: bool) {
        self.state.lock().await.failing_writes = failing;
    }

    /// Durable documents of a domain, ordered by key hash.
    pub async fn documents(&self, domain: Domain) -> Vec<JsonValue> {
        let state = self.state.lock().await;
        state
            .durable
            .get(&domain)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn realtime_documents(&self, domain: Domain) -> Vec<JsonValue> {
        let state = self.state.lock().await;
        state.realtime.get(&domain).cloned().unwrap_or_default()
    }

    /// Full checkpoint history of a domain in insertion order.
    pub async fn checkpoints(&self, domain: Domain) -> Vec<Checkpoint> {
        let state = self.state.lock().await;
        state.checkpoints.get(&domain).cloned().unwrap_or_default()
    }

    fn ensure_writable(state: &MemoryState, domain: Domain) -> Result<()> {
        if state.failing_writes {
            return Err(StorageError::Unavailable(format!(
                "memory store rejecting writes for {domain}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_last(&self, domain: Domain) -> Result<Option<Checkpoint>> {
        let state = self.state.lock().await;
        Ok(state
            .checkpoints
            .get(&domain)
            .and_then(|log| log.iter().max_by_key(|c| c.extracted_at))
            .cloned())
    }

    async fn put(&self, domain: Domain, checkpoint: &Checkpoint) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_writable(&state, domain)?;
        state
            .checkpoints
            .entry(domain)
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for MemoryStore {
    async fn upsert(&self, domain: Domain, documents: &[Document]) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }

        let staged = stage_documents(documents)?;

        let mut state = self.state.lock().await;
        Self::ensure_writable(&state, domain)?;
        let collection = state.durable.entry(domain).or_default();
        for doc in staged {
            collection.insert(doc.key_hash, doc.body);
        }
        debug!(%domain, written = documents.len(), total = collection.len(), "memory upsert");
        Ok(documents.len() as u64)
    }

    async fn replace_all(&self, domain: Domain, documents: &[Document]) -> Result<u64> {
        let mut bodies = Vec::with_capacity(documents.len());
        for doc in documents {
            bodies.push(doc.to_json()?);
        }

        let mut state = self.state.lock().await;
        Self::ensure_writable(&state, domain)?;
        state.realtime.insert(domain, bodies);
        Ok(documents.len() as u64)
    }
}
