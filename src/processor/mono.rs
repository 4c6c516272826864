use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;
use crate::builder::{BuildContext, BuilderChain, Operation};
use crate::connection::ConnectionRegistry;
use crate::core::record::json_object_to_record;
use crate::core::{Key, Record, RepoError, Result, Value, from_record, to_record};
use crate::engine::Predicate;
use crate::entity::EntitySchema;
use crate::executor::{QueryExecutor, Target};
use super::{Model, OperationOptions, Page, PageRequest, Processor};

/// One operation, one query per connection.
pub struct MonoProcessor<M> {
    executor: QueryExecutor,
    chain: Arc<BuilderChain>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for MonoProcessor<M> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            chain: self.chain.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for MonoProcessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonoProcessor")
            .field("executor", &self.executor)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Partial model → Record. Only JSON objects are accepted.
pub(crate) fn record_from_json(changes: &JsonValue) -> Result<Record> {
    match changes {
        JsonValue::Object(fields) => json_object_to_record(fields),
        _ => Err(RepoError::Validation(
            "Changes must be an object carrying the primary key".into(),
        )),
    }
}

impl<M: Model> MonoProcessor<M> {
    pub fn new(registry: Arc<ConnectionRegistry>, schema: EntitySchema) -> Result<Self> {
        schema.validate()?;
        let chain = BuilderChain::for_schema(&schema);
        Ok(Self::with_chain(QueryExecutor::new(registry, Arc::new(schema)), chain))
    }

    /// Uses a caller-assembled builder chain instead of the standard one.
    pub fn with_chain(executor: QueryExecutor, chain: BuilderChain) -> Self {
        Self {
            executor,
            chain: Arc::new(chain),
            _model: PhantomData,
        }
    }

    pub fn schema(&self) -> &EntitySchema {
        self.executor.schema()
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn chain(&self) -> &BuilderChain {
        &self.chain
    }

    /// Fills a missing tenant id in the options from `record`. Fails when the
    /// entity is multi-tenant and neither carries one.
    pub(crate) fn scoped(&self, options: &OperationOptions, record: Option<&Record>) -> Result<OperationOptions> {
        let mut scoped = options.clone();
        if let Some(column) = self.schema().tenant_column()
            && scoped.tenant_id.is_none()
        {
            scoped.tenant_id = record
                .and_then(|record| record.get(column))
                .filter(|value| !value.is_null())
                .cloned();
            if scoped.tenant_id.is_none() {
                return Err(RepoError::Validation(format!(
                    "Tenant id is required for '{}'",
                    self.schema().table()
                )));
            }
        }
        Ok(scoped)
    }

    /// Writes the options' tenant id into `record`. A record already
    /// carrying another tenant is rejected.
    fn stamp_tenant(&self, record: &mut Record, options: &OperationOptions) -> Result<()> {
        let (Some(column), Some(tenant)) = (self.schema().tenant_column(), &options.tenant_id) else {
            return Ok(());
        };
        if let Some(own) = record.get(column)
            && !own.is_null()
            && own != tenant
        {
            return Err(RepoError::Validation(format!(
                "Record of '{}' belongs to tenant {}, not {}",
                self.schema().table(),
                own.to_literal(),
                tenant.to_literal()
            )));
        }
        record.insert(column.to_string(), tenant.clone());
        Ok(())
    }

    fn deleted_at_column(&self) -> Result<&str> {
        self.schema().deleted_at_column().ok_or_else(|| {
            RepoError::UnsupportedOperation(format!(
                "Entity '{}' has no soft-delete column",
                self.schema().table()
            ))
        })
    }

    /// Inserts `record` after stamping the tenant id. With `refetch` the
    /// stored row is read back.
    pub(crate) async fn create_record(&self, mut record: Record, options: &OperationOptions) -> Result<Option<Record>> {
        let options = self.scoped(options, Some(&record))?;
        self.stamp_tenant(&mut record, &options)?;
        let key = Key::from_record(self.schema().primary_key(), &record)?;

        self.insert_record(record, &options).await?;
        if options.refetch {
            return self.find_record(&key, &options).await;
        }
        Ok(None)
    }

    pub(crate) async fn insert_record(&self, record: Record, options: &OperationOptions) -> Result<u64> {
        self.executor
            .write(options.target(Target::All), |fresh, _| Ok(fresh.insert(record)))
            .await
    }

    pub(crate) async fn find_record(&self, key: &Key, options: &OperationOptions) -> Result<Option<Record>> {
        let ctx = BuildContext::new(self.schema(), options).with_key(key);
        let rows = self
            .executor
            .read(options.target(Target::Primary), |fresh, _| {
                self.chain.fold(Operation::FindByKey, fresh, &ctx)
            })
            .await?
            .into_rows()?;
        Ok(rows.into_iter().next())
    }

    /// Keyed write built by `operation`; returns the agreed affected count.
    pub(crate) async fn write_keyed(
        &self,
        operation: Operation,
        key: &Key,
        record: Option<&Record>,
        options: &OperationOptions,
    ) -> Result<u64> {
        let mut ctx = BuildContext::new(self.schema(), options).with_key(key);
        if let Some(record) = record {
            ctx = ctx.with_record(record);
        }
        self.executor
            .write(options.target(Target::All), |fresh, _| {
                self.chain.fold(operation, fresh, &ctx)
            })
            .await
    }

    /// Writes `record` with `operation` and reads the row back.
    async fn write_and_reread(&self, operation: Operation, record: Record, options: &OperationOptions) -> Result<Option<M>> {
        let options = self.scoped(options, Some(&record))?;
        let key = Key::from_record(self.schema().primary_key(), &record)?;

        let affected = self.write_keyed(operation, &key, Some(&record), &options).await?;
        if affected == 0 {
            return Ok(None);
        }
        self.find_by_key(&key, &options).await
    }

    async fn has_duplicates(&self, key: &Key, row: &Record, options: &OperationOptions) -> Result<bool> {
        let ctx = BuildContext::new(self.schema(), options)
            .with_key(key)
            .with_record(row);
        let count = self
            .executor
            .read(options.target(Target::Primary), |fresh, _| {
                Ok(self.chain.fold(Operation::Duplicates, fresh, &ctx)?.count())
            })
            .await?
            .count()?;
        Ok(count > 0)
    }

    fn duplicate_error(&self, key: &Key) -> RepoError {
        RepoError::DuplicateUniqueKey(format!(
            "'{}' row {} collides with an active row on ({})",
            self.schema().table(),
            key,
            self.schema().unique_columns().join(", ")
        ))
    }
}

#[async_trait]
impl<M: Model> Processor<M> for MonoProcessor<M> {
    fn schema(&self) -> &EntitySchema {
        self.executor.schema()
    }

    async fn create(&self, model: &M, options: &OperationOptions) -> Result<M> {
        match self.create_record(to_record(model)?, options).await? {
            Some(row) => from_record(&row),
            None => Ok(model.clone()),
        }
    }

    async fn count_all(&self, options: &OperationOptions) -> Result<u64> {
        let ctx = BuildContext::new(self.schema(), options);
        self.executor
            .read(options.target(Target::Primary), |fresh, _| {
                self.chain.fold(Operation::CountAll, fresh, &ctx)
            })
            .await?
            .count()
    }

    async fn find_by_key(&self, key: &Key, options: &OperationOptions) -> Result<Option<M>> {
        self.find_record(key, options)
            .await?
            .map(|row| from_record(&row))
            .transpose()
    }

    async fn exists(&self, key: &Key, options: &OperationOptions) -> Result<bool> {
        let ctx = BuildContext::new(self.schema(), options).with_key(key);
        let count = self
            .executor
            .read(options.target(Target::Primary), |fresh, _| {
                self.chain.fold(Operation::Exists, fresh, &ctx)
            })
            .await?
            .count()?;
        Ok(count > 0)
    }

    async fn page(&self, request: &PageRequest, options: &OperationOptions) -> Result<Page<M>> {
        let total = self.count_all(options).await?;

        let ctx = BuildContext::new(self.schema(), options).with_page(request);
        let rows = self
            .executor
            .read(options.target(Target::Primary), |fresh, _| {
                self.chain.fold(Operation::Page, fresh, &ctx)
            })
            .await?
            .into_rows()?;

        Ok(Page {
            items: rows.iter().map(from_record).collect::<Result<Vec<M>>>()?,
            page: request.page.max(1),
            size: request.size,
            total,
        })
    }

    async fn patch(&self, changes: &JsonValue, options: &OperationOptions) -> Result<Option<M>> {
        self.write_and_reread(Operation::Patch, record_from_json(changes)?, options)
            .await
    }

    async fn update(&self, model: &M, options: &OperationOptions) -> Result<Option<M>> {
        self.write_and_reread(Operation::Update, to_record(model)?, options)
            .await
    }

    async fn delete_hard(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.write_keyed(Operation::HardDelete, key, None, options).await
    }

    async fn delete_soft(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        let mut changes = Record::new();
        changes.insert(self.deleted_at_column()?.to_string(), Value::Timestamp(Utc::now()));
        self.write_keyed(Operation::Patch, key, Some(&changes), options).await
    }

    async fn recover(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        let column = self.deleted_at_column()?;

        let lookup = BuildContext::new(self.schema(), options).with_key(key);
        let found = self
            .executor
            .read(options.target(Target::Primary), |fresh, _| {
                self.chain.fold(Operation::RecoverOptions, fresh, &lookup)
            })
            .await?
            .into_rows()?
            .into_iter()
            .next();
        let Some(row) = found else {
            return Ok(0);
        };

        if self.has_duplicates(key, &row, options).await? {
            return Err(self.duplicate_error(key));
        }

        // the flip re-checks for an active duplicate in the same statement
        let mut changes = Record::new();
        changes.insert(column.to_string(), Value::Null);
        let flip_options = OperationOptions {
            include_deleted: true,
            ..options.clone()
        };
        let flip = BuildContext::new(self.schema(), &flip_options)
            .with_key(key)
            .with_record(&changes);
        let guard = BuildContext::new(self.schema(), &flip_options)
            .with_key(key)
            .with_record(&row);

        let affected = self
            .executor
            .write(options.target(Target::All), |fresh, _| {
                let duplicates = self.chain.build(Operation::Duplicates, &guard)?;
                Ok(self
                    .chain
                    .fold(Operation::Patch, fresh, &flip)?
                    .and_where(Predicate::NotExists(Box::new(duplicates))))
            })
            .await?;

        if affected == 0 && self.has_duplicates(key, &row, options).await? {
            debug!(table = self.schema().table(), key = %key, "recover lost a unique-key race");
            return Err(self.duplicate_error(key));
        }
        Ok(affected)
    }
}
