use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Model, ModelStore, StoreError};

/// In-process backend. Documents are held in serialized form so that
/// create/retrieve semantics match the remote backend exactly.
pub struct MemoryStore<M> {
    docs: RwLock<HashMap<String, Value>>,
    _model: PhantomData<fn() -> M>,
}

impl<M> MemoryStore<M> {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            _model: PhantomData,
        }
    }
}

impl<M> Default for MemoryStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(doc: &Value, filter: &Value) -> bool {
    let Some(fields) = filter.as_object() else {
        return false;
    };
    fields.iter().all(|(key, expected)| {
        let actual = doc.get(key).cloned().unwrap_or(Value::Null);
        actual == *expected
    })
}

#[async_trait]
impl<M: Model> ModelStore<M> for MemoryStore<M> {
    async fn create(&self, obj: &M) -> Result<(), StoreError> {
        let doc = serde_json::to_value(obj)?;
        self.docs.write().await.insert(obj.reg_id().to_string(), doc);
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<M, StoreError> {
        let docs = self.docs.read().await;
        let doc = docs.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(serde_json::from_value(doc.clone())?)
    }

    async fn retrieve_all(&self) -> Result<Vec<M>, StoreError> {
        let docs = self.docs.read().await;
        docs.values()
            .map(|doc| serde_json::from_value(doc.clone()).map_err(StoreError::from))
            .collect()
    }

    async fn update(&self, obj: &M) -> Result<(), StoreError> {
        self.create(obj).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.docs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_by(&self, filter: &Value) -> Result<Vec<M>, StoreError> {
        let docs = self.docs.read().await;
        docs.values()
            .filter(|doc| matches(doc, filter))
            .map(|doc| serde_json::from_value(doc.clone()).map_err(StoreError::from))
            .collect()
    }
}
