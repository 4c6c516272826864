// ============================================================================
// repoflow Library
// ============================================================================

//! Multi-connection repository toolkit.
//!
//! A [`Repository`] stores one entity type across every connection of a
//! [`ConnectionRegistry`]. Writes reach all connections and must agree on
//! their outcome, reads go to the primary connection, and multi-step work
//! runs inside a [`SessionFlow`] that commits everywhere or nowhere. Soft
//! delete, multi-tenancy and row versioning are opt-in per [`EntitySchema`].
//!
//! ```
//! use std::sync::Arc;
//! use repoflow::{
//!     Column, ConnectionRegistry, DataType, EntitySchema, MemoryEngine, OperationOptions,
//!     Repository, TableSchema,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> repoflow::Result<()> {
//! let engine = Arc::new(MemoryEngine::new());
//! engine
//!     .create_table(TableSchema::new(
//!         "users",
//!         vec![
//!             Column::new("id", DataType::Integer).primary_key(),
//!             Column::new("name", DataType::Text).not_null(),
//!         ],
//!     ))
//!     .await?;
//!
//! let registry = Arc::new(ConnectionRegistry::new().with("main", engine)?);
//! let users: Repository<User> = Repository::new(registry, EntitySchema::new("users", &["id"]))?;
//!
//! let options = OperationOptions::new();
//! users.create(&User { id: 1, name: "Alice".into() }, &options).await?;
//! assert_eq!(users.count_all(&options).await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod connection;
pub mod core;
pub mod engine;
pub mod entity;
pub mod executor;
pub mod processor;
pub mod repository;
pub mod session;

pub use crate::builder::{BuildContext, BuilderChain, Operation, QueryBuilder};
pub use crate::connection::config::{ConnectionConfig, RegistryConfig};
pub use crate::connection::{ConnectionHandle, ConnectionRegistry};
pub use crate::core::{Column, DataType, Key, Record, RepoError, Result, TableSchema, Value, from_record, to_record};
pub use crate::engine::{MemoryEngine, Predicate, Query, QueryOutput, RecordEngine, SortType, TransactionId};
pub use crate::entity::{EntitySchema, Versioning};
pub use crate::executor::{QueryExecutor, Target};
pub use crate::processor::{
    BatchProcessor, Model, MonoProcessor, OperationOptions, Page, PageRequest, Processor,
    VersionControlledProcessor,
};
pub use crate::repository::Repository;
pub use crate::session::{AtomicSession, FlowState, SessionFactory, SessionFlow};
