//! In-memory document store used when no Elasticsearch is at hand

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::client::{DocumentStore, StoreError};
use super::document::Document;

#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    pub settings: Value,
    pub mapping: Value,
    pub documents: Vec<Document>,
}

/// Document store kept in process memory.
///
/// Indexes are not created implicitly: writing to a missing index fails, so
/// provisioning mistakes show up in tests.
pub struct MemoryStore {
    indexes: Mutex<HashMap<String, MemoryIndex>>,
    available: AtomicBool,
    create_calls: AtomicUsize,
    mapping_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            indexes: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            create_calls: AtomicUsize::new(0),
            mapping_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate an outage: every call fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn index(&self, name: &str) -> Option<MemoryIndex> {
        self.indexes.lock().get(name).cloned()
    }

    pub fn documents(&self, name: &str) -> Vec<Document> {
        self.indexes
            .lock()
            .get(name)
            .map(|index| index.documents.clone())
            .unwrap_or_default()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.lock().keys().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn mapping_calls(&self) -> usize {
        self.mapping_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Network("memory store unavailable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn index_exists(&self, index: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.indexes.lock().contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), StoreError> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut indexes = self.indexes.lock();
        if indexes.contains_key(index) {
            return Err(StoreError::AlreadyExists(index.to_string()));
        }

        indexes.insert(
            index.to_string(),
            MemoryIndex {
                settings: body.get("settings").cloned().unwrap_or(Value::Null),
                mapping: body.get("mappings").cloned().unwrap_or(Value::Null),
                documents: Vec::new(),
            },
        );
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), StoreError> {
        self.check_available()?;
        self.mapping_calls.fetch_add(1, Ordering::SeqCst);

        let mut indexes = self.indexes.lock();
        let entry = indexes.get_mut(index).ok_or_else(|| StoreError::Rejected {
            status: 404,
            body: format!("no such index [{}]", index),
        })?;
        merge_json(&mut entry.mapping, mapping);
        Ok(())
    }

    async fn index_document(&self, index: &str, document: &Document) -> Result<(), StoreError> {
        self.check_available()?;

        let mut indexes = self.indexes.lock();
        let entry = indexes.get_mut(index).ok_or_else(|| StoreError::Rejected {
            status: 404,
            body: format!("no such index [{}]", index),
        })?;
        entry.documents.push(document.clone());
        Ok(())
    }
}

/// Recursively merge `update` into `target`, the way a mapping update adds
/// fields without dropping existing ones
fn merge_json(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                merge_json(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, update) => *target = update.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::document::LogMessage;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_merge_json_keeps_existing_fields() {
        let mut target = json!({"properties": {"a": {"type": "text"}}});
        merge_json(&mut target, &json!({"properties": {"b": {"type": "date"}}}));
        assert_eq!(
            target,
            json!({"properties": {"a": {"type": "text"}, "b": {"type": "date"}}})
        );
    }

    #[tokio::test]
    async fn test_write_requires_index() {
        let store = MemoryStore::new();
        let doc = Document::log(Utc::now(), LogMessage::default());

        assert!(store.index_document("missing", &doc).await.is_err());

        store.create_index("vdc", &json!({})).await.unwrap();
        store.index_document("vdc", &doc).await.unwrap();
        assert_eq!(store.documents("vdc").len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(store.ping().await.is_err());
        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
