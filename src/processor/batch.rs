use std::fmt;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use tracing::warn;
use crate::core::{Key, RepoError, Result};
use crate::entity::EntitySchema;
use crate::executor::agreed_count;
use crate::session::SessionFactory;
use super::{Model, OperationOptions, Page, PageRequest, Processor};

type Shared<M> = Arc<dyn Processor<M>>;

/// Collection operations over any [`Processor`].
///
/// With an atomic session in the options every element runs concurrently in
/// that session. Otherwise a session flow over every connection is opened,
/// one stage issues all elements concurrently in each session and the flow
/// is closed at once, so a failing element rolls back the whole batch.
pub struct BatchProcessor<M> {
    inner: Shared<M>,
    factory: SessionFactory,
}

impl<M> Clone for BatchProcessor<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<M> fmt::Debug for BatchProcessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}

/// Delete and recover elements count as one when they touched a row. A
/// failing element counts as zero.
fn counted(operation: &str, key: &Key, result: Result<u64>) -> Result<bool> {
    match result {
        Ok(affected) => Ok(affected > 0),
        Err(err) => {
            warn!(operation, key = %key, error = %err, "batch element failed");
            Ok(false)
        }
    }
}

/// Per-session element results must agree on which elements found a row.
fn agreed_presence<T>(per_session: &[Vec<Option<T>>]) -> Result<()> {
    let patterns: Vec<Vec<bool>> = per_session
        .iter()
        .map(|results| results.iter().map(Option::is_some).collect())
        .collect();
    if patterns.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(RepoError::not_on_all_connections(format!(
            "matched rows differ per connection {:?}",
            patterns
        )));
    }
    Ok(())
}

impl<M: Model> BatchProcessor<M> {
    pub fn new(inner: Shared<M>, factory: SessionFactory) -> Self {
        Self { inner, factory }
    }

    pub fn inner(&self) -> &Shared<M> {
        &self.inner
    }

    /// Runs `op` for every item; returns the element results of each
    /// session in connection order.
    async fn fan_out<I, R, F, Fut>(&self, items: Vec<I>, options: &OperationOptions, op: F) -> Result<Vec<Vec<R>>>
    where
        I: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        F: Fn(Shared<M>, I, OperationOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        if options.atomic_session.is_some() {
            let results =
                try_join_all(items.into_iter().map(|item| op(self.inner.clone(), item, options.clone()))).await?;
            return Ok(vec![results]);
        }

        let flow = self.factory.start_session::<Vec<R>>(&[]).await?;
        let (items, op, inner, options) = (Arc::new(items), Arc::new(op), self.inner.clone(), options.clone());
        flow.pipe(move |session, _| {
            let (items, op, inner, options) = (items.clone(), op.clone(), inner.clone(), options.in_session(session));
            async move {
                try_join_all(
                    items
                        .iter()
                        .cloned()
                        .map(|item| (*op)(inner.clone(), item, options.clone())),
                )
                .await
            }
        })?;

        let outputs = flow.close_pipe().await?;
        Ok(outputs.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn first<R>(per_session: Vec<Vec<R>>) -> Vec<R> {
        per_session.into_iter().next().unwrap_or_default()
    }

    fn total(per_session: &[Vec<bool>]) -> Result<u64> {
        let counts: Vec<u64> = per_session
            .iter()
            .map(|results| results.iter().filter(|hit| **hit).count() as u64)
            .collect();
        agreed_count(&counts)
    }

    pub async fn create_many(&self, models: &[M], options: &OperationOptions) -> Result<Vec<M>> {
        let per_session = self
            .fan_out(models.to_vec(), options, |inner: Shared<M>, model: M, options| async move {
                inner.create(&model, &options).await
            })
            .await?;
        Ok(Self::first(per_session))
    }

    pub async fn patch_many(&self, changes: &[JsonValue], options: &OperationOptions) -> Result<Vec<Option<M>>> {
        let per_session = self
            .fan_out(changes.to_vec(), options, |inner: Shared<M>, changes: JsonValue, options| async move {
                inner.patch(&changes, &options).await
            })
            .await?;
        agreed_presence(&per_session)?;
        Ok(Self::first(per_session))
    }

    pub async fn update_many(&self, models: &[M], options: &OperationOptions) -> Result<Vec<Option<M>>> {
        let per_session = self
            .fan_out(models.to_vec(), options, |inner: Shared<M>, model: M, options| async move {
                inner.update(&model, &options).await
            })
            .await?;
        agreed_presence(&per_session)?;
        Ok(Self::first(per_session))
    }

    pub async fn delete_hard_many(&self, keys: &[Key], options: &OperationOptions) -> Result<u64> {
        let per_session = self
            .fan_out(keys.to_vec(), options, |inner: Shared<M>, key: Key, options| async move {
                counted("delete_hard", &key, inner.delete_hard(&key, &options).await)
            })
            .await?;
        Self::total(&per_session)
    }

    pub async fn delete_soft_many(&self, keys: &[Key], options: &OperationOptions) -> Result<u64> {
        let per_session = self
            .fan_out(keys.to_vec(), options, |inner: Shared<M>, key: Key, options| async move {
                counted("delete_soft", &key, inner.delete_soft(&key, &options).await)
            })
            .await?;
        Self::total(&per_session)
    }

    pub async fn recover_many(&self, keys: &[Key], options: &OperationOptions) -> Result<u64> {
        let per_session = self
            .fan_out(keys.to_vec(), options, |inner: Shared<M>, key: Key, options| async move {
                counted("recover", &key, inner.recover(&key, &options).await)
            })
            .await?;
        Self::total(&per_session)
    }
}

#[async_trait]
impl<M: Model> Processor<M> for BatchProcessor<M> {
    fn schema(&self) -> &EntitySchema {
        self.inner.schema()
    }

    async fn create(&self, model: &M, options: &OperationOptions) -> Result<M> {
        self.inner.create(model, options).await
    }

    async fn count_all(&self, options: &OperationOptions) -> Result<u64> {
        self.inner.count_all(options).await
    }

    async fn find_by_key(&self, key: &Key, options: &OperationOptions) -> Result<Option<M>> {
        self.inner.find_by_key(key, options).await
    }

    async fn exists(&self, key: &Key, options: &OperationOptions) -> Result<bool> {
        self.inner.exists(key, options).await
    }

    async fn page(&self, request: &PageRequest, options: &OperationOptions) -> Result<Page<M>> {
        self.inner.page(request, options).await
    }

    async fn patch(&self, changes: &JsonValue, options: &OperationOptions) -> Result<Option<M>> {
        self.inner.patch(changes, options).await
    }

    async fn update(&self, model: &M, options: &OperationOptions) -> Result<Option<M>> {
        self.inner.update(model, options).await
    }

    async fn delete_hard(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.inner.delete_hard(key, options).await
    }

    async fn delete_soft(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.inner.delete_soft(key, options).await
    }

    async fn recover(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.inner.recover(key, options).await
    }
}
