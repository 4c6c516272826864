// ============================================================================
// Transaction identity and change log
// ============================================================================
//
// A MemoryEngine transaction works on a private copy of the tables and keeps
// the statements it applied as a list of Changes. COMMIT replays the list on
// the committed tables; ROLLBACK simply forgets it.
//
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use crate::core::Record;
use super::query::Query;
use super::table::Tables;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// A single row-level change recorded by a transaction.
///
/// An update keeps the `NOT EXISTS` sub-queries of the statement that made it;
/// they must still find nothing when the change is replayed at commit.
#[derive(Debug, Clone)]
pub enum Change {
    InsertRow { table: String, row_id: u64, row: Record },
    UpdateRow { table: String, row_id: u64, row: Record, guards: Vec<Query> },
    DeleteRow { table: String, row_id: u64 },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }
}

/// Working state of one open transaction.
pub(crate) struct TransactionState {
    pub(crate) working: Tables,
    pub(crate) changes: Vec<Change>,
}

impl TransactionState {
    pub(crate) fn new(snapshot: Tables) -> Self {
        Self {
            working: snapshot,
            changes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(a.to_string().starts_with("txn_"));
    }

    #[test]
    fn test_change_table_name() {
        let change = Change::DeleteRow { table: "users".into(), row_id: 4 };
        assert_eq!(change.table_name(), "users");
    }
}
