//! Query executor: runs one built query against an explicit connection set.

use std::fmt;
use std::sync::Arc;
use futures::future::join_all;
use tracing::{debug, warn};
use crate::connection::ConnectionRegistry;
use crate::core::{RepoError, Result};
use crate::engine::{Query, QueryOutput};
use crate::entity::EntitySchema;
use crate::session::AtomicSession;

/// Where a query runs.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// The primary connection, autocommit.
    Primary,
    /// Every registered connection concurrently, autocommit.
    All,
    /// The caller's open transaction.
    Session(&'a AtomicSession),
}

impl Target<'_> {
    fn label(&self) -> &str {
        match self {
            Self::Primary => "primary",
            Self::All => "all",
            Self::Session(session) => session.connection_name(),
        }
    }
}

/// Executes queries for one entity.
///
/// The query is produced by a callback that receives a fresh query on the
/// entity's table together with the entity schema, so callers never name
/// tables themselves.
#[derive(Clone)]
pub struct QueryExecutor {
    registry: Arc<ConnectionRegistry>,
    schema: Arc<EntitySchema>,
}

impl QueryExecutor {
    pub fn new(registry: Arc<ConnectionRegistry>, schema: Arc<EntitySchema>) -> Self {
        Self { registry, schema }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Fresh SELECT on the entity's table.
    pub fn fresh(&self) -> Query {
        Query::table(self.schema.table())
    }

    /// Runs the built query and returns one output per connection reached,
    /// in registration order. With [`Target::All`] the first failing
    /// connection's error is returned.
    pub async fn execute<F>(&self, target: Target<'_>, build: F) -> Result<Vec<QueryOutput>>
    where
        F: FnOnce(Query, &EntitySchema) -> Result<Query>,
    {
        let query = build(self.fresh(), &self.schema)?;
        debug!(on = target.label(), query = %query, "executing");

        match target {
            Target::Primary => {
                let connection = self.registry.primary()?;
                Ok(vec![connection.engine().execute(&query, None).await?])
            }
            Target::Session(session) => Ok(vec![session.execute(&query).await?]),
            Target::All => {
                let connections = self.registry.all();
                if connections.is_empty() {
                    return Err(RepoError::Configuration("No usable connection settings".into()));
                }

                let results =
                    join_all(connections.iter().map(|c| c.engine().execute(&query, None))).await;

                let mut outputs = Vec::with_capacity(results.len());
                let mut failure = None;
                for (connection, result) in connections.iter().zip(results) {
                    match result {
                        Ok(output) => outputs.push(output),
                        Err(err) => {
                            warn!(connection = connection.name(), error = %err, "query failed");
                            failure.get_or_insert(err);
                        }
                    }
                }
                match failure {
                    Some(err) => Err(err),
                    None => Ok(outputs),
                }
            }
        }
    }

    /// Runs a read and returns the first connection's output.
    pub async fn read<F>(&self, target: Target<'_>, build: F) -> Result<QueryOutput>
    where
        F: FnOnce(Query, &EntitySchema) -> Result<Query>,
    {
        self.execute(target, build)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::Execution("Query reached no connection".into()))
    }

    /// Runs a write and returns its affected-row count, which must agree
    /// across every connection reached.
    pub async fn write<F>(&self, target: Target<'_>, build: F) -> Result<u64>
    where
        F: FnOnce(Query, &EntitySchema) -> Result<Query>,
    {
        let outputs = self.execute(target, build).await?;
        let counts = outputs
            .iter()
            .map(QueryOutput::affected)
            .collect::<Result<Vec<_>>>()?;
        agreed_count(&counts)
    }
}

/// The shared value of per-connection counts, or a consistency error
/// listing them.
pub(crate) fn agreed_count(counts: &[u64]) -> Result<u64> {
    match counts.split_first() {
        None => Ok(0),
        Some((first, rest)) if rest.iter().all(|count| count == first) => Ok(*first),
        Some(_) => Err(RepoError::not_on_all_connections(format!(
            "affected rows differ per connection {:?}",
            counts
        ))),
    }
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("table", &self.schema.table())
            .field("connections", &self.registry.len())
            .finish()
    }
}
