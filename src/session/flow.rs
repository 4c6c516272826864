use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::future::{BoxFuture, FutureExt, join_all};
use tokio::sync::OnceCell;
use tracing::{Instrument, debug, info_span, warn};
use crate::connection::ConnectionHandle;
use crate::core::{RepoError, Result};
use super::AtomicSession;

type Stage<T> = Arc<dyn Fn(AtomicSession, Option<T>) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Lifecycle of a [`SessionFlow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Transactions are being opened.
    Initializing,
    /// Accepting stages.
    Open,
    /// `close_pipe` is running stages or committing.
    Closing,
    Committed,
    RolledBack,
}

struct FlowInner<T> {
    state: FlowState,
    stages: Vec<Stage<T>>,
}

/// Staged work fanned out over one transaction per connection.
///
/// Each stage runs concurrently on every session and receives that session's
/// output of the previous stage (`None` for the first stage). Stages run
/// strictly one after another. `close_pipe` commits every session when all
/// stages succeed and rolls every session back otherwise; its outcome is
/// computed once and replayed on later calls.
///
/// A flow dropped before it was closed rolls back its transactions in the
/// background.
pub struct SessionFlow<T> {
    sessions: Vec<AtomicSession>,
    inner: Mutex<FlowInner<T>>,
    outcome: OnceCell<Result<Vec<Option<T>>>>,
}

impl<T> SessionFlow<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Opens one transaction per connection. If any BEGIN fails the
    /// transactions already opened are rolled back.
    pub(crate) async fn open(connections: Vec<ConnectionHandle>) -> Result<Self> {
        if connections.is_empty() {
            return Err(RepoError::Configuration(
                "No connection matches the session filter".into(),
            ));
        }

        let mut flow = Self {
            sessions: Vec::with_capacity(connections.len()),
            inner: Mutex::new(FlowInner {
                state: FlowState::Initializing,
                stages: Vec::new(),
            }),
            outcome: OnceCell::new(),
        };

        let began = join_all(connections.iter().map(|c| c.engine().begin())).await;
        let mut failure = None;
        for (connection, result) in connections.into_iter().zip(began) {
            match result {
                Ok(transaction) => flow.sessions.push(AtomicSession::new(connection, transaction)),
                Err(err) => {
                    warn!(connection = connection.name(), error = %err, "session flow: begin failed");
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            rollback_all(&flow.sessions).await;
            flow.set_state(FlowState::RolledBack);
            return Err(err);
        }

        flow.set_state(FlowState::Open);
        debug!(sessions = flow.sessions.len(), "session flow: open");
        Ok(flow)
    }

    /// Appends a stage. Fails once closing has begun.
    pub fn pipe<F, Fut>(&self, stage: F) -> Result<&Self>
    where
        F: Fn(AtomicSession, Option<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut inner = self.lock();
        if inner.state != FlowState::Open {
            return Err(RepoError::pipe_closed());
        }

        let stage: Stage<T> =
            Arc::new(move |session: AtomicSession, previous: Option<T>| stage(session, previous).boxed());
        inner.stages.push(stage);
        Ok(self)
    }

    /// Runs every stage, then commits or rolls back all sessions.
    ///
    /// Returns the last stage's output per session in connection order.
    /// Calling it again returns the first outcome without running anything.
    pub async fn close_pipe(&self) -> Result<Vec<Option<T>>> {
        self.outcome.get_or_init(|| self.settle()).await.clone()
    }

    async fn settle(&self) -> Result<Vec<Option<T>>> {
        let stages = {
            let mut inner = self.lock();
            if inner.state != FlowState::Open {
                return Err(RepoError::State(
                    "Session flow was interrupted while closing".into(),
                ));
            }
            inner.state = FlowState::Closing;
            std::mem::take(&mut inner.stages)
        };

        let span = info_span!("session_flow", sessions = self.sessions.len(), stages = stages.len());
        async move {
            let mut outputs: Vec<Option<T>> = vec![None; self.sessions.len()];

            for (index, stage) in stages.iter().enumerate() {
                let previous = std::mem::take(&mut outputs);
                let results = join_all(
                    self.sessions
                        .iter()
                        .zip(previous)
                        .map(|(session, previous)| stage(session.clone(), previous)),
                )
                .await;

                let mut failure = None;
                outputs = Vec::with_capacity(results.len());
                for (session, result) in self.sessions.iter().zip(results) {
                    match result {
                        Ok(output) => outputs.push(Some(output)),
                        Err(err) => {
                            warn!(
                                stage = index,
                                connection = session.connection_name(),
                                error = %err,
                                "session flow: stage failed"
                            );
                            failure.get_or_insert(err);
                            outputs.push(None);
                        }
                    }
                }

                if let Some(err) = failure {
                    rollback_all(&self.sessions).await;
                    self.set_state(FlowState::RolledBack);
                    return Err(err);
                }
            }

            let committed = join_all(self.sessions.iter().map(AtomicSession::commit)).await;
            let mut failure = None;
            for (session, result) in self.sessions.iter().zip(committed) {
                if let Err(err) = result {
                    warn!(connection = session.connection_name(), error = %err, "session flow: commit failed");
                    if let Err(cleanup) = session.rollback().await {
                        debug!(connection = session.connection_name(), error = %cleanup, "session flow: nothing to roll back");
                    }
                    failure.get_or_insert(err);
                }
            }

            if let Some(err) = failure {
                self.set_state(FlowState::RolledBack);
                return Err(err);
            }

            self.set_state(FlowState::Committed);
            debug!("session flow: committed");
            Ok(outputs)
        }
        .instrument(span)
        .await
    }
}

impl<T> SessionFlow<T> {
    pub fn state(&self) -> FlowState {
        self.lock().state
    }

    /// Participating sessions in connection registration order.
    pub fn sessions(&self) -> &[AtomicSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FlowState) {
        self.lock().state = state;
    }
}

async fn rollback_all(sessions: &[AtomicSession]) {
    let results = join_all(sessions.iter().map(AtomicSession::rollback)).await;
    for (session, result) in sessions.iter().zip(results) {
        if let Err(err) = result {
            warn!(connection = session.connection_name(), error = %err, "session flow: rollback failed");
        }
    }
}

impl<T> Drop for SessionFlow<T> {
    fn drop(&mut self) {
        let state = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner).state;
        if !matches!(state, FlowState::Open | FlowState::Closing) || self.sessions.is_empty() {
            return;
        }

        let sessions = std::mem::take(&mut self.sessions);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { rollback_all(&sessions).await });
            }
            Err(_) => warn!(
                sessions = sessions.len(),
                "session flow dropped outside a runtime, transactions left open"
            ),
        }
    }
}

impl<T> fmt::Debug for SessionFlow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionFlow")
            .field("sessions", &self.sessions)
            .field("state", &inner.state)
            .field("stages", &inner.stages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRegistry;
    use crate::core::{Column, DataType, Record, TableSchema, Value};
    use crate::engine::{MemoryEngine, Query, RecordEngine};

    async fn engine() -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new());
        engine
            .create_table(TableSchema::new(
                "items",
                vec![
                    Column::new("id", DataType::Integer).primary_key(),
                    Column::new("label", DataType::Text).not_null(),
                ],
            ))
            .await
            .unwrap();
        engine
    }

    async fn two_engines() -> (Arc<MemoryEngine>, Arc<MemoryEngine>, ConnectionRegistry) {
        let main = engine().await;
        let replica = engine().await;
        let registry = ConnectionRegistry::new()
            .with("main", main.clone())
            .and_then(|r| r.with("replica", replica.clone()))
            .unwrap();
        (main, replica, registry)
    }

    fn insert(id: i64, label: Value) -> Query {
        let mut record = Record::new();
        record.insert("id".into(), Value::Integer(id));
        record.insert("label".into(), label);
        Query::table("items").insert(record)
    }

    async fn count(engine: &MemoryEngine) -> u64 {
        engine
            .execute(&Query::table("items").count(), None)
            .await
            .unwrap()
            .count()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stage_outputs_feed_the_next_stage() {
        let (_, _, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();

        flow.pipe(|_, previous| async move {
            assert!(previous.is_none());
            Ok(10)
        })
        .unwrap()
        .pipe(|_, previous| async move { Ok(previous.unwrap_or_default() + 1) })
        .unwrap();

        assert_eq!(flow.close_pipe().await.unwrap(), vec![Some(11), Some(11)]);
        assert_eq!(flow.state(), FlowState::Committed);
    }

    #[tokio::test]
    async fn test_empty_flow_commits() {
        let (main, replica, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();

        assert_eq!(flow.close_pipe().await.unwrap(), vec![None, None]);
        assert_eq!(main.open_transactions().await, 0);
        assert_eq!(replica.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_failed_stage_rolls_back_every_session() {
        let (main, replica, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();

        flow.pipe(|session, _| async move {
            session.execute(&insert(1, Value::from("a"))).await?.affected()
        })
        .unwrap()
        .pipe(|session, previous| async move {
            let label = if session.connection_name() == "replica" {
                Value::Null
            } else {
                Value::from("b")
            };
            let affected = session.execute(&insert(2, label)).await?.affected()?;
            Ok(previous.unwrap_or_default() + affected)
        })
        .unwrap();

        let err = flow.close_pipe().await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_) | RepoError::ConstraintViolation(_)));
        assert_eq!(flow.state(), FlowState::RolledBack);

        assert_eq!(count(&main).await, 0);
        assert_eq!(count(&replica).await, 0);
        assert_eq!(main.open_transactions().await, 0);
        assert_eq!(replica.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_successful_flow_commits_everywhere() {
        let (main, replica, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();

        flow.pipe(|session, _| async move {
            session.execute(&insert(1, Value::from("a"))).await?.affected()
        })
        .unwrap();

        assert_eq!(flow.close_pipe().await.unwrap(), vec![Some(1), Some(1)]);
        assert_eq!(count(&main).await, 1);
        assert_eq!(count(&replica).await, 1);
    }

    #[tokio::test]
    async fn test_pipe_after_close_is_rejected() {
        let (_, _, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();
        flow.close_pipe().await.unwrap();

        let err = flow.pipe(|_, _| async { Ok(1) }).unwrap_err();
        assert_eq!(err, RepoError::State("Pipe has been closed!".into()));
        assert_eq!(err.to_string(), "Pipe has been closed!");
    }

    #[tokio::test]
    async fn test_close_pipe_is_idempotent() {
        let (main, _, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&["main"])).await.unwrap();

        flow.pipe(|session, _| async move {
            session.execute(&insert(1, Value::from("a"))).await?.affected()
        })
        .unwrap();

        let first = flow.close_pipe().await.unwrap();
        let second = flow.close_pipe().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(count(&main).await, 1);
    }

    #[tokio::test]
    async fn test_failed_outcome_is_replayed() {
        let (_, _, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();
        flow.pipe(|_, _| async { Err(RepoError::Execution("boom".into())) })
            .unwrap();

        let first = flow.close_pipe().await.unwrap_err();
        let second = flow.close_pipe().await.unwrap_err();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_dropped_flow_rolls_back() {
        let (main, replica, registry) = two_engines().await;
        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();
        flow.sessions()[0]
            .execute(&insert(1, Value::from("a")))
            .await
            .unwrap();
        assert_eq!(main.open_transactions().await, 1);

        drop(flow);
        for _ in 0..10 {
            if main.open_transactions().await == 0 && replica.open_transactions().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(main.open_transactions().await, 0);
        assert_eq!(replica.open_transactions().await, 0);
        assert_eq!(count(&main).await, 0);
    }

    #[tokio::test]
    async fn test_failed_begin_rolls_back_opened_sessions() {
        struct Broken;

        #[async_trait::async_trait]
        impl RecordEngine for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            async fn begin(&self) -> Result<crate::engine::TransactionId> {
                Err(RepoError::Execution("offline".into()))
            }
            async fn commit(&self, _: crate::engine::TransactionId) -> Result<()> {
                Ok(())
            }
            async fn rollback(&self, _: crate::engine::TransactionId) -> Result<()> {
                Ok(())
            }
            async fn execute(
                &self,
                _: &Query,
                _: Option<crate::engine::TransactionId>,
            ) -> Result<crate::engine::QueryOutput> {
                Err(RepoError::Execution("offline".into()))
            }
        }

        let main = engine().await;
        let registry = ConnectionRegistry::new()
            .with("main", main.clone())
            .and_then(|r| r.with("broken", Arc::new(Broken)))
            .unwrap();

        let err = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap_err();
        assert_eq!(err, RepoError::Execution("offline".into()));
        assert_eq!(main.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_the_flow() {
        struct RefusesCommit(Arc<MemoryEngine>);

        #[async_trait::async_trait]
        impl RecordEngine for RefusesCommit {
            fn name(&self) -> &'static str {
                "refuses-commit"
            }
            async fn begin(&self) -> Result<crate::engine::TransactionId> {
                self.0.begin().await
            }
            async fn commit(&self, transaction: crate::engine::TransactionId) -> Result<()> {
                self.0.rollback(transaction).await?;
                Err(RepoError::Execution("disk full".into()))
            }
            async fn rollback(&self, transaction: crate::engine::TransactionId) -> Result<()> {
                self.0.rollback(transaction).await
            }
            async fn execute(
                &self,
                query: &Query,
                transaction: Option<crate::engine::TransactionId>,
            ) -> Result<crate::engine::QueryOutput> {
                self.0.execute(query, transaction).await
            }
        }

        let main = engine().await;
        let replica = engine().await;
        let registry = ConnectionRegistry::new()
            .with("main", main.clone())
            .and_then(|r| r.with("replica", Arc::new(RefusesCommit(replica.clone()))))
            .unwrap();

        let flow = SessionFlow::<u64>::open(registry.matching(&[])).await.unwrap();
        flow.pipe(|session, _| async move {
            session.execute(&insert(1, Value::from("a"))).await?.affected()
        })
        .unwrap();

        let err = flow.close_pipe().await.unwrap_err();
        assert_eq!(err, RepoError::Execution("disk full".into()));
        assert_eq!(flow.state(), FlowState::RolledBack);
        assert_eq!(flow.close_pipe().await.unwrap_err(), err);

        assert_eq!(count(&replica).await, 0);
        assert_eq!(main.open_transactions().await, 0);
        assert_eq!(replica.open_transactions().await, 0);
        assert!(flow.pipe(|_, _| async { Ok(0) }).is_err());
    }
}
