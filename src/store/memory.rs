use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

use super::{
    Apply, Committed, DocumentStore, StoreError, Transition, document_id, expire_at,
    stamp_created_at,
};

// In-process store. Each key's transaction runs while its shard entry is locked,
// so updates to one key are serialized across tasks and threads.
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<(String, String), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn transact(
        &self,
        collection: &str,
        id: &str,
        apply: Apply,
    ) -> Result<Committed, StoreError> {
        match self.documents.entry((collection.to_string(), id.to_string())) {
            Entry::Occupied(mut entry) => match apply(Some(entry.get())) {
                Transition::Put(document) => {
                    entry.insert(document.clone());
                    Ok(Committed::Written(document))
                }
                Transition::Abort => Ok(Committed::Aborted),
            },
            Entry::Vacant(entry) => match apply(None) {
                Transition::Put(document) => {
                    entry.insert(document.clone());
                    Ok(Committed::Written(document))
                }
                Transition::Abort => Ok(Committed::Aborted),
            },
        }
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<String, StoreError> {
        let document = stamp_created_at(document, Utc::now().timestamp_millis())?;
        let id = document_id(collection);
        self.documents.insert((collection.to_string(), id.clone()), document);
        Ok(id)
    }

    #[cfg(test)]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .documents
            .get(&(collection.to_string(), id.to_string()))
            .map(|doc| doc.value().clone()))
    }

    async fn purge_expired(&self, collection: &str, now_ms: i64) -> Result<u64, StoreError> {
        let before = self.documents.len();
        self.documents.retain(|(coll, _), doc| {
            coll != collection || expire_at(doc).is_none_or(|at| at >= now_ms)
        });
        Ok(before.saturating_sub(self.documents.len()) as u64)
    }
}
