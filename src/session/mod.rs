//! Atomic sessions and multi-connection session flows.
//!
//! An [`AtomicSession`] pins one connection to one open transaction. A
//! [`SessionFlow`] owns one session per participating connection and drives
//! staged work across all of them, committing everywhere or nowhere.

pub mod factory;
pub mod flow;

pub use factory::SessionFactory;
pub use flow::{FlowState, SessionFlow};

use crate::connection::ConnectionHandle;
use crate::core::Result;
use crate::engine::{Query, QueryOutput, TransactionId};

/// One open transaction on one connection.
#[derive(Debug, Clone)]
pub struct AtomicSession {
    connection: ConnectionHandle,
    transaction: TransactionId,
}

impl AtomicSession {
    pub(crate) fn new(connection: ConnectionHandle, transaction: TransactionId) -> Self {
        Self {
            connection,
            transaction,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Runs `query` inside this session's transaction.
    pub async fn execute(&self, query: &Query) -> Result<QueryOutput> {
        self.connection
            .engine()
            .execute(query, Some(self.transaction))
            .await
    }

    pub(crate) async fn commit(&self) -> Result<()> {
        self.connection.engine().commit(self.transaction).await
    }

    pub(crate) async fn rollback(&self) -> Result<()> {
        self.connection.engine().rollback(self.transaction).await
    }
}
