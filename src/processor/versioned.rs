use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;
use crate::builder::Operation;
use crate::connection::ConnectionRegistry;
use crate::core::{Key, Record, RepoError, Result, Value, from_record, to_record};
use crate::entity::{EntitySchema, Versioning};
use crate::session::SessionFactory;
use super::mono::record_from_json;
use super::{Model, MonoProcessor, OperationOptions, Page, PageRequest, Processor};

/// Row versioning on top of [`MonoProcessor`].
///
/// Changing a trigger property never edits the main row in place: the main
/// row is demoted and a copy carrying the change is inserted as the next
/// version. Every other write is delegated unchanged.
pub struct VersionControlledProcessor<M> {
    mono: MonoProcessor<M>,
    factory: SessionFactory,
    versioning: Arc<Versioning>,
}

impl<M> Clone for VersionControlledProcessor<M> {
    fn clone(&self) -> Self {
        Self {
            mono: self.mono.clone(),
            factory: self.factory.clone(),
            versioning: self.versioning.clone(),
        }
    }
}

impl<M> fmt::Debug for VersionControlledProcessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionControlledProcessor")
            .field("mono", &self.mono)
            .field("versioning", &self.versioning)
            .finish()
    }
}

impl<M: Model> VersionControlledProcessor<M> {
    pub fn new(registry: Arc<ConnectionRegistry>, schema: EntitySchema) -> Result<Self> {
        let versioning = schema.versioning().cloned().ok_or_else(|| {
            RepoError::Configuration(format!(
                "Entity '{}' is not version-controlled",
                schema.table()
            ))
        })?;
        let factory = SessionFactory::new(registry.clone());
        Ok(Self {
            mono: MonoProcessor::new(registry, schema)?,
            factory,
            versioning: Arc::new(versioning),
        })
    }

    pub fn mono(&self) -> &MonoProcessor<M> {
        &self.mono
    }

    fn triggers_new_version(&self, changes: &Record) -> bool {
        changes
            .keys()
            .any(|column| !self.mono.schema().is_primary_key(column) && self.versioning.is_trigger(column))
    }

    /// Demotes the main row and returns it as it was, `None` if there is none.
    async fn demote(&self, key: &Key, options: &OperationOptions) -> Result<Option<Record>> {
        let Some(prior) = self.mono.find_record(key, options).await? else {
            return Ok(None);
        };

        let mut changes = Record::new();
        changes.insert(self.versioning.main_column.clone(), Value::Boolean(false));
        self.mono
            .write_keyed(Operation::Demote, key, Some(&changes), options)
            .await?;
        Ok(Some(prior))
    }

    /// Inserts the successor of `prior` carrying `changes`.
    async fn insert_next(&self, prior: Record, changes: &Record, options: &OperationOptions) -> Result<Record> {
        let next = self.successor(prior, changes)?;
        self.mono.insert_record(next.clone(), options).await?;
        Ok(next)
    }

    async fn promote(&self, key: &Key, changes: &Record, options: &OperationOptions) -> Result<Option<Record>> {
        match self.demote(key, options).await? {
            Some(prior) => Ok(Some(self.insert_next(prior, changes, options).await?)),
            None => Ok(None),
        }
    }

    fn successor(&self, mut row: Record, changes: &Record) -> Result<Record> {
        let schema = self.mono.schema();
        let version_column = &self.versioning.version_column;
        let main_column = &self.versioning.main_column;

        let current = row
            .get(version_column)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                RepoError::Validation(format!(
                    "Main row of '{}' has no integer '{}'",
                    schema.table(),
                    version_column
                ))
            })?;

        for (column, value) in changes {
            let fixed = schema.is_primary_key(column)
                || column == version_column
                || column == main_column
                || schema.tenant_column() == Some(column.as_str());
            if !fixed {
                row.insert(column.clone(), value.clone());
            }
        }
        row.insert(version_column.clone(), Value::Integer(current + 1));
        row.insert(main_column.clone(), Value::Boolean(true));
        Ok(row)
    }

    /// Demote-then-insert, in the caller's session or in a fresh flow over
    /// every connection.
    async fn new_version(&self, changes: Record, options: &OperationOptions) -> Result<Option<M>> {
        let key = Key::from_record(self.mono.schema().primary_key(), &changes)?;
        let mut options = self.mono.scoped(options, Some(&changes))?;
        options.version = None;
        options.fields.clear();

        let row = if options.atomic_session.is_some() {
            self.promote(&key, &changes, &options).await?
        } else {
            self.promote_everywhere(key, changes, options).await?
        };

        if let Some(row) = &row {
            debug!(
                table = self.mono.schema().table(),
                version = ?row.get(&self.versioning.version_column),
                "new version"
            );
        }
        row.as_ref().map(from_record).transpose()
    }

    async fn promote_everywhere(&self, key: Key, changes: Record, options: OperationOptions) -> Result<Option<Record>> {
        let flow = self.factory.start_session::<Option<Record>>(&[]).await?;

        let (this, demote_key, demote_options) = (self.clone(), key.clone(), options.clone());
        flow.pipe(move |session, _| {
            let (this, key, options) = (this.clone(), demote_key.clone(), demote_options.in_session(session));
            async move { this.demote(&key, &options).await }
        })?;

        let this = self.clone();
        flow.pipe(move |session, prior| {
            let (this, changes, options) = (this.clone(), changes.clone(), options.in_session(session));
            async move {
                match prior.flatten() {
                    Some(prior) => Ok(Some(this.insert_next(prior, &changes, &options).await?)),
                    None => Ok(None),
                }
            }
        })?;

        let outputs = flow.close_pipe().await?;

        let versions: Vec<Option<i64>> = outputs
            .iter()
            .map(|output| {
                output
                    .as_ref()
                    .and_then(Option::as_ref)
                    .and_then(|row| row.get(&self.versioning.version_column))
                    .and_then(Value::as_i64)
            })
            .collect();
        if versions.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(RepoError::not_on_all_connections(format!(
                "{} {} reached versions {:?}",
                self.mono.schema().table(),
                key,
                versions
            )));
        }

        Ok(outputs.into_iter().next().flatten().flatten())
    }
}

#[async_trait]
impl<M: Model> Processor<M> for VersionControlledProcessor<M> {
    fn schema(&self) -> &EntitySchema {
        self.mono.schema()
    }

    async fn create(&self, model: &M, options: &OperationOptions) -> Result<M> {
        let mut record = to_record(model)?;
        let version_column = &self.versioning.version_column;
        if record.get(version_column).is_none_or(Value::is_null) {
            record.insert(version_column.clone(), Value::Integer(1));
        }
        record.insert(self.versioning.main_column.clone(), Value::Boolean(true));

        match self.mono.create_record(record.clone(), options).await? {
            Some(row) => from_record(&row),
            None => from_record(&record),
        }
    }

    async fn count_all(&self, options: &OperationOptions) -> Result<u64> {
        self.mono.count_all(options).await
    }

    async fn find_by_key(&self, key: &Key, options: &OperationOptions) -> Result<Option<M>> {
        self.mono.find_by_key(key, options).await
    }

    async fn exists(&self, key: &Key, options: &OperationOptions) -> Result<bool> {
        self.mono.exists(key, options).await
    }

    async fn page(&self, request: &PageRequest, options: &OperationOptions) -> Result<Page<M>> {
        self.mono.page(request, options).await
    }

    async fn patch(&self, changes: &JsonValue, options: &OperationOptions) -> Result<Option<M>> {
        let record = record_from_json(changes)?;
        if !self.triggers_new_version(&record) {
            return self.mono.patch(changes, options).await;
        }
        self.new_version(record, options).await
    }

    async fn update(&self, model: &M, options: &OperationOptions) -> Result<Option<M>> {
        let record = to_record(model)?;
        if !self.triggers_new_version(&record) {
            return self.mono.update(model, options).await;
        }
        self.new_version(record, options).await
    }

    async fn delete_hard(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.mono.delete_hard(key, options).await
    }

    async fn delete_soft(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.mono.delete_soft(key, options).await
    }

    async fn recover(&self, key: &Key, options: &OperationOptions) -> Result<u64> {
        self.mono.recover(key, options).await
    }
}
