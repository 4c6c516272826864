//! Query builder chain.
//!
//! Every entity operation is built by left-folding an ordered list of
//! builders over a fresh query: the base builder first, then the tenant
//! builder when the entity is multi-tenant, then the version builder when it
//! is versioned. A builder receives the accumulator produced by the previous
//! one and may only add constraints to it.

pub mod base;
pub mod tenant;
pub mod version;

pub use base::BaseBuilder;
pub use tenant::TenantBuilder;
pub use version::VersionBuilder;

use std::fmt;
use crate::core::{Key, Record, RepoError, Result};
use crate::engine::{Predicate, Query};
use crate::entity::EntitySchema;
use crate::processor::{OperationOptions, PageRequest};

/// Operations the chain knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CountAll,
    HardDelete,
    Exists,
    FindByKey,
    Page,
    Patch,
    RecoverOptions,
    Update,
    /// Active rows sharing a unique value with the context record.
    Duplicates,
    /// Clears the main flag of a versioned row before its successor is
    /// inserted.
    Demote,
}

/// Inputs shared by every builder while one query is folded.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub schema: &'a EntitySchema,
    pub options: &'a OperationOptions,
    pub key: Option<&'a Key>,
    /// Changes for patch/update, the candidate row for duplicates.
    pub record: Option<&'a Record>,
    pub page: Option<&'a PageRequest>,
}

impl<'a> BuildContext<'a> {
    pub fn new(schema: &'a EntitySchema, options: &'a OperationOptions) -> Self {
        Self {
            schema,
            options,
            key: None,
            record: None,
            page: None,
        }
    }

    pub fn with_key(mut self, key: &'a Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_record(mut self, record: &'a Record) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_page(mut self, page: &'a PageRequest) -> Self {
        self.page = Some(page);
        self
    }

    /// A pristine query on the entity's table.
    pub fn fresh(&self) -> Query {
        Query::table(self.schema.table())
    }

    pub fn key(&self) -> Result<&'a Key> {
        self.key.ok_or_else(|| missing("a primary key", self.schema))
    }

    pub fn record(&self) -> Result<&'a Record> {
        self.record.ok_or_else(|| missing("a record", self.schema))
    }

    /// Equality on every primary-key column.
    pub fn key_predicate(&self) -> Result<Predicate> {
        let key = self.key()?;
        let columns = self.schema.primary_key();
        let predicates = key
            .zip(columns)?
            .map(|(column, value)| Predicate::eq(column.as_str(), value.clone()))
            .collect();
        Ok(Predicate::all(predicates))
    }
}

fn missing(what: &str, schema: &EntitySchema) -> RepoError {
    RepoError::Validation(format!("Building a query on '{}' requires {}", schema.table(), what))
}

/// One link of the chain. Every operation passes the accumulator through
/// unchanged unless the builder overrides it.
pub trait QueryBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn count_all(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn hard_delete(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn exists(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn find_by_key(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn page(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn patch(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn recover_options(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn update(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    fn duplicates(&self, acc: Query, _ctx: &BuildContext<'_>) -> Result<Query> {
        Ok(acc)
    }

    /// Built like a patch unless overridden.
    fn demote(&self, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.patch(acc, ctx)
    }

    fn apply(&self, operation: Operation, acc: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        match operation {
            Operation::CountAll => self.count_all(acc, ctx),
            Operation::HardDelete => self.hard_delete(acc, ctx),
            Operation::Exists => self.exists(acc, ctx),
            Operation::FindByKey => self.find_by_key(acc, ctx),
            Operation::Page => self.page(acc, ctx),
            Operation::Patch => self.patch(acc, ctx),
            Operation::RecoverOptions => self.recover_options(acc, ctx),
            Operation::Update => self.update(acc, ctx),
            Operation::Duplicates => self.duplicates(acc, ctx),
            Operation::Demote => self.demote(acc, ctx),
        }
    }
}

/// Ordered builders, folded left to right.
#[derive(Default)]
pub struct BuilderChain {
    builders: Vec<Box<dyn QueryBuilder>>,
}

impl BuilderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain for `schema`.
    pub fn for_schema(schema: &EntitySchema) -> Self {
        let mut chain = Self::new();
        chain.register(Box::new(BaseBuilder));
        if let Some(column) = schema.tenant_column() {
            chain.register(Box::new(TenantBuilder::new(column)));
        }
        if let Some(versioning) = schema.versioning() {
            chain.register(Box::new(VersionBuilder::new(versioning)));
        }
        chain
    }

    pub fn register(&mut self, builder: Box<dyn QueryBuilder>) {
        self.builders.push(builder);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.builders.iter().map(|b| b.name()).collect()
    }

    /// Folds `operation` over a fresh query.
    pub fn build(&self, operation: Operation, ctx: &BuildContext<'_>) -> Result<Query> {
        self.fold(operation, ctx.fresh(), ctx)
    }

    /// Folds `operation` over `seed`.
    pub fn fold(&self, operation: Operation, seed: Query, ctx: &BuildContext<'_>) -> Result<Query> {
        self.builders
            .iter()
            .try_fold(seed, |acc, builder| builder.apply(operation, acc, ctx))
    }
}

impl fmt::Debug for BuilderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
