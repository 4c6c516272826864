//! Record/query engine contract.
//!
//! The repository core never touches storage directly. It builds [`Query`]
//! values and hands them to a [`RecordEngine`] together with an optional
//! transaction handle. [`MemoryEngine`] is the bundled implementation.

pub mod memory;
pub mod query;
pub mod table;
pub mod transaction;

pub use memory::MemoryEngine;
pub use query::{Action, Predicate, Query, Sort, SortType};
pub use transaction::TransactionId;

use crate::core::{Record, RepoError, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Record>),
    Count(u64),
    Affected(u64),
}

impl QueryOutput {
    pub fn into_rows(self) -> Result<Vec<Record>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            other => Err(unexpected("rows", &other)),
        }
    }

    pub fn count(&self) -> Result<u64> {
        match self {
            Self::Count(count) => Ok(*count),
            Self::Rows(rows) => Ok(rows.len() as u64),
            other => Err(unexpected("a count", other)),
        }
    }

    pub fn affected(&self) -> Result<u64> {
        match self {
            Self::Affected(affected) => Ok(*affected),
            other => Err(unexpected("an affected-row count", other)),
        }
    }
}

fn unexpected(expected: &str, got: &QueryOutput) -> RepoError {
    RepoError::Execution(format!("Engine returned {:?} where {} was expected", got, expected))
}

#[async_trait]
pub trait RecordEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<TransactionId>;

    async fn commit(&self, transaction: TransactionId) -> Result<()>;

    async fn rollback(&self, transaction: TransactionId) -> Result<()>;

    /// Runs one statement, inside `transaction` when given, autocommit otherwise.
    async fn execute(&self, query: &Query, transaction: Option<TransactionId>) -> Result<QueryOutput>;
}
