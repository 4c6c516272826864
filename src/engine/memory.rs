use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use crate::core::{RepoError, Result, TableSchema};
use super::query::{Action, Query};
use super::table::{self, Table, Tables};
use super::transaction::{TransactionId, TransactionState};
use super::{QueryOutput, RecordEngine};

/// In-process record engine.
///
/// Autocommit statements run directly against the committed tables. A
/// transaction starts from an O(1) snapshot of them, applies its statements
/// to that private copy and replays its change log on COMMIT, so the other
/// transactions only ever observe committed work.
pub struct MemoryEngine {
    tables: RwLock<Tables>,
    transactions: Mutex<HashMap<TransactionId, Arc<Mutex<TransactionState>>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Engine pre-populated with empty tables.
    pub fn with_tables(schemas: impl IntoIterator<Item = TableSchema>) -> Result<Self> {
        let mut tables = Tables::new();
        for schema in schemas {
            let name = schema.name().to_string();
            if tables.contains_key(&name) {
                return Err(RepoError::TableExists(name));
            }
            tables.insert(name, Table::new(schema));
        }
        Ok(Self {
            tables: RwLock::new(tables),
            transactions: Mutex::new(HashMap::new()),
        })
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.write().await;
        let name = schema.name().to_string();
        if tables.contains_key(&name) {
            return Err(RepoError::TableExists(name));
        }
        tables.insert(name, Table::new(schema));
        Ok(())
    }

    /// Number of transactions begun but neither committed nor rolled back.
    pub async fn open_transactions(&self) -> usize {
        self.transactions.lock().await.len()
    }

    async fn transaction(&self, id: TransactionId) -> Result<Arc<Mutex<TransactionState>>> {
        self.transactions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepoError::TransactionNotFound(id.to_string()))
    }

    async fn finish(&self, id: TransactionId) -> Result<Arc<Mutex<TransactionState>>> {
        self.transactions
            .lock()
            .await
            .remove(&id)
            .ok_or_else(|| RepoError::TransactionNotFound(id.to_string()))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn is_read(query: &Query) -> bool {
    matches!(query.action(), Action::Select | Action::Count)
}

#[async_trait]
impl RecordEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<TransactionId> {
        let snapshot = self.tables.read().await.clone();
        let id = TransactionId::new();
        self.transactions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(TransactionState::new(snapshot))));
        debug!(transaction = %id, "memory engine: begin");
        Ok(id)
    }

    async fn commit(&self, transaction: TransactionId) -> Result<()> {
        let handle = self.finish(transaction).await?;
        let state = handle.lock().await;

        let mut committed = self.tables.write().await;
        let mut next = committed.clone();
        table::replay(&mut next, &state.changes)?;
        *committed = next;

        debug!(transaction = %transaction, changes = state.changes.len(), "memory engine: commit");
        Ok(())
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<()> {
        self.finish(transaction).await?;
        debug!(transaction = %transaction, "memory engine: rollback");
        Ok(())
    }

    async fn execute(&self, query: &Query, transaction: Option<TransactionId>) -> Result<QueryOutput> {
        if !query.relation_list().is_empty() {
            debug!(relations = ?query.relation_list(), "memory engine: relations are not loaded");
        }
        match transaction {
            Some(id) => {
                let handle = self.transaction(id).await?;
                let mut state = handle.lock().await;
                if is_read(query) {
                    return table::read(&state.working, query);
                }
                let (output, changes) = table::write(&mut state.working, query)?;
                state.changes.extend(changes);
                Ok(output)
            }
            None if is_read(query) => {
                let tables = self.tables.read().await;
                table::read(&tables, query)
            }
            None => {
                let mut tables = self.tables.write().await;
                let (output, _) = table::write(&mut tables, query)?;
                Ok(output)
            }
        }
    }
}
