// ============================================================================
// Repository facade
// ============================================================================

use std::sync::Arc;
use serde::Serialize;
use crate::connection::ConnectionRegistry;
use crate::core::{Key, Result};
use crate::entity::EntitySchema;
use crate::processor::{
    BatchProcessor, Model, MonoProcessor, OperationOptions, Page, PageRequest, Processor,
    VersionControlledProcessor,
};
use crate::session::{SessionFactory, SessionFlow};

/// Entry point for one entity type.
///
/// Picks the processor stack from the entity schema (row versioning or
/// not) and wraps it for collection operations. Writes go to every
/// registered connection, reads to the primary one, unless the options
/// carry an atomic session.
pub struct Repository<M: Model> {
    registry: Arc<ConnectionRegistry>,
    factory: SessionFactory,
    processor: BatchProcessor<M>,
}

impl<M: Model> Repository<M> {
    /// Fails with a configuration error for an invalid schema or an empty
    /// registry.
    pub fn new(registry: Arc<ConnectionRegistry>, schema: EntitySchema) -> Result<Self> {
        registry.primary()?;

        let inner: Arc<dyn Processor<M>> = if schema.versioning().is_some() {
            Arc::new(VersionControlledProcessor::new(registry.clone(), schema)?)
        } else {
            Arc::new(MonoProcessor::new(registry.clone(), schema)?)
        };
        let factory = SessionFactory::new(registry.clone());

        Ok(Self {
            registry,
            processor: BatchProcessor::new(inner, factory.clone()),
            factory,
        })
    }

    pub fn schema(&self) -> &EntitySchema {
        self.processor.schema()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn processor(&self) -> &BatchProcessor<M> {
        &self.processor
    }

    pub fn session_factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Opens a session flow; see [`SessionFactory::start_session`].
    pub async fn start_session<T>(&self, names: &[&str]) -> Result<SessionFlow<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.factory.start_session(names).await
    }

    pub async fn count_all(&self, options: &OperationOptions) -> Result<u64> {
        self.processor.count_all(options).await
    }

    pub async fn create(&self, model: &M, options: &OperationOptions) -> Result<M> {
        self.processor.create(model, options).await
    }

    pub async fn create_many(&self, models: &[M], options: &OperationOptions) -> Result<Vec<M>> {
        self.processor.create_many(models, options).await
    }

    /// Soft delete when the entity has a soft-delete column, hard delete
    /// otherwise.
    pub async fn delete_single(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        if self.schema().deleted_at_column().is_some() {
            self.processor.delete_soft(key, options).await
        } else {
            self.processor.delete_hard(key, options).await
        }
    }

    pub async fn delete_many(&self, keys: &[Key], options: &OperationOptions) -> Result<u64> {
        if self.schema().deleted_at_column().is_some() {
            self.processor.delete_soft_many(keys, options).await
        } else {
            self.processor.delete_hard_many(keys, options).await
        }
    }

    pub async fn exists(&self, key: &Key, options: &OperationOptions) -> Result<bool> {
        self.processor.exists(key, options).await
    }

    pub async fn find_by_id(&self, key: &Key, options: &OperationOptions) -> Result<Option<M>> {
        self.processor.find_by_key(key, options).await
    }

    pub async fn page(&self, request: &PageRequest, options: &OperationOptions) -> Result<Page<M>> {
        self.processor.page(request, options).await
    }

    /// Applies any serializable partial model that carries the primary key.
    pub async fn patch<C>(&self, changes: &C, options: &OperationOptions) -> Result<Option<M>>
    where
        C: Serialize + ?Sized,
    {
        let changes = serde_json::to_value(changes)?;
        self.processor.patch(&changes, options).await
    }

    pub async fn patch_many<C>(&self, changes: &[C], options: &OperationOptions) -> Result<Vec<Option<M>>>
    where
        C: Serialize,
    {
        let changes = changes
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.processor.patch_many(&changes, options).await
    }

    pub async fn update(&self, model: &M, options: &OperationOptions) -> Result<Option<M>> {
        self.processor.update(model, options).await
    }

    pub async fn update_many(&self, models: &[M], options: &OperationOptions) -> Result<Vec<Option<M>>> {
        self.processor.update_many(models, options).await
    }

    pub async fn delete_soft(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.processor.delete_soft(key, options).await
    }

    pub async fn delete_hard(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.processor.delete_hard(key, options).await
    }

    pub async fn recover(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.processor.recover(key, options).await
    }

    pub async fn recover_many(&self, keys: &[Key], options: &OperationOptions) -> Result<u64> {
        self.processor.recover_many(keys, options).await
    }
}

impl<M: Model> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            factory: self.factory.clone(),
            processor: self.processor.clone(),
        }
    }
}

impl<M: Model> std::fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.schema().table())
            .field("connections", &self.registry.len())
            .finish()
    }
}
