//! Pluggable persistence for identity-bearing records.
//!
//! Backends are interchangeable from the protocol engine's point of view:
//! documents round-trip through JSON in both, so anything marked
//! `#[serde(skip)]` (the transport-session message queues) is empty after
//! any load, regardless of backend.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod elastic;
pub mod memory;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store backend: {0}")]
    Backend(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// An identity-bearing record the store can hold.
pub trait Model: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn reg_id(&self) -> &str;
}

/// Uniform data-access contract across backends.
///
/// `update` has upsert semantics; `find_by` takes a flat field-equality
/// predicate (a JSON object), with `null` matching records where the field
/// is null or absent.
#[async_trait]
pub trait ModelStore<M: Model>: Send + Sync {
    async fn create(&self, obj: &M) -> Result<(), StoreError>;
    async fn retrieve(&self, id: &str) -> Result<M, StoreError>;
    async fn retrieve_all(&self) -> Result<Vec<M>, StoreError>;
    async fn update(&self, obj: &M) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    async fn find_by(&self, filter: &serde_json::Value) -> Result<Vec<M>, StoreError>;
}
