//! Entity processors.
//!
//! [`MonoProcessor`] turns one operation into one query per connection.
//! [`VersionControlledProcessor`] adds row versioning on top of it and
//! [`BatchProcessor`] fans collections out over a session flow.

pub mod batch;
pub mod mono;
pub mod options;
pub mod versioned;

pub use batch::BatchProcessor;
pub use mono::MonoProcessor;
pub use options::{OperationOptions, Page, PageRequest};
pub use versioned::VersionControlledProcessor;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use crate::core::{Key, Result};
use crate::entity::EntitySchema;

/// Domain types a repository can store.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Model for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Single-entity operations.
///
/// Writes reach every connection unless the options carry an atomic session;
/// reads go to the primary connection unless they carry one.
#[async_trait]
pub trait Processor<M: Model>: Send + Sync {
    fn schema(&self) -> &EntitySchema;

    async fn create(&self, model: &M, options: &OperationOptions) -> Result<M>;

    async fn count_all(&self, options: &OperationOptions) -> Result<u64>;

    async fn find_by_key(&self, key: &Key, options: &OperationOptions) -> Result<Option<M>>;

    async fn exists(&self, key: &Key, options: &OperationOptions) -> Result<bool>;

    async fn page(&self, request: &PageRequest, options: &OperationOptions) -> Result<Page<M>>;

    /// Applies a partial model that carries the primary key; returns the
    /// row as stored afterwards, `None` when nothing matched.
    async fn patch(&self, changes: &JsonValue, options: &OperationOptions) -> Result<Option<M>>;

    async fn update(&self, model: &M, options: &OperationOptions) -> Result<Option<M>>;

    async fn delete_hard(&self, key: &Key, options: &OperationOptions) -> Result<u64>;

    async fn delete_soft(&self, key: &Key, options: &OperationOptions) -> Result<u64>;

    async fn recover(&self, key: &Key, options: &OperationOptions) -> Result<u64>;
}
