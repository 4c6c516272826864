
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use fixtures::{User, cluster, count_on, count_rows, user, users_schema};
use repoflow::{FlowState, OperationOptions, RepoError, Repository};
use serde_json::{Value as JsonValue, json};

#[tokio::test]
async fn test_close_pipe_returns_one_output_per_connection_in_order() {
    let (_, registry) = cluster(&["main", "replica", "audit"]);
    let users: Repository<User> = Repository::new(registry, users_schema()).unwrap();

    let flow = users.start_session::<String>(&[]).await.unwrap();
    flow.pipe(|session, _| async move { Ok(session.connection_name().to_string()) })
        .unwrap();

    let outputs = flow.close_pipe().await.unwrap();
    assert_eq!(
        outputs,
        vec![
            Some("main".to_string()),
            Some("replica".to_string()),
            Some("audit".to_string())
        ]
    );
    assert!(flow.sessions()[0].connection().is_primary());
}

#[tokio::test]
async fn test_close_pipe_runs_tasks_once() {
    let (_, registry) = cluster(&["main", "replica"]);
    let users: Repository<User> = Repository::new(registry, users_schema()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let flow = users.start_session::<usize>(&[]).await.unwrap();
    let counter = calls.clone();
    flow.pipe(move |_, _| {
        let counter = counter.clone();
        async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    })
    .unwrap();

    let (first, second) = tokio::join!(flow.close_pipe(), flow.close_pipe());
    let third = flow.close_pipe().await;

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(flow.state(), FlowState::Committed);
}

#[tokio::test]
async fn test_pipe_after_close_pipe_fails() {
    let (_, registry) = cluster(&["main"]);
    let users: Repository<User> = Repository::new(registry, users_schema()).unwrap();

    let flow = users.start_session::<u64>(&[]).await.unwrap();
    flow.close_pipe().await.unwrap();

    let err = flow.pipe(|_, _| async { Ok(0) }).unwrap_err();
    assert!(matches!(err, RepoError::State(_)));
    assert_eq!(err.to_string(), "Pipe has been closed!");
}

#[tokio::test]
async fn test_failed_stage_leaves_every_connection_untouched() {
    let (engines, registry) = cluster(&["main", "replica"]);
    let users: Repository<JsonValue> = Repository::new(registry, users_schema()).unwrap();

    let flow = users.start_session::<u64>(&[]).await.unwrap();
    let repo = users.clone();
    flow.pipe(move |session, _| {
        let repo = repo.clone();
        async move {
            let options = OperationOptions::new().session(session);
            repo.create(&json!({"id": 1, "email": "a@example.com"}), &options)
                .await?;
            Ok(1)
        }
    })
    .unwrap();
    let repo = users.clone();
    flow.pipe(move |session, previous| {
        let repo = repo.clone();
        async move {
            let options = OperationOptions::new().session(session);
            repo.create(&json!({"id": 2, "email": null}), &options).await?;
            Ok(previous.unwrap_or_default() + 1)
        }
    })
    .unwrap();

    let err = flow.close_pipe().await.unwrap_err();
    assert!(matches!(err, RepoError::ConstraintViolation(_)));
    assert_eq!(flow.state(), FlowState::RolledBack);

    let options = OperationOptions::new();
    assert_eq!(count_on(&users, "main", &options).await, 0);
    assert_eq!(count_on(&users, "replica", &options).await, 0);
    for engine in &engines {
        assert_eq!(engine.open_transactions().await, 0);
    }
}

#[tokio::test]
async fn test_operations_in_a_caller_session_commit_together() {
    let (engines, registry) = cluster(&["main", "replica"]);
    let users: Repository<User> = Repository::new(registry, users_schema()).unwrap();

    let flow = users.start_session::<Option<User>>(&[]).await.unwrap();
    let repo = users.clone();
    flow.pipe(move |session, _| {
        let repo = repo.clone();
        async move {
            let options = OperationOptions::new().session(session);
            repo.create(&user(1, "a@example.com"), &options).await?;
            repo.patch(&json!({"id": 1, "name": "Ada"}), &options).await
        }
    })
    .unwrap();

    for engine in &engines {
        assert_eq!(count_rows(engine, "users", None).await, 0);
    }

    let outputs = flow.close_pipe().await.unwrap();
    for output in &outputs {
        let patched = output.clone().flatten().unwrap();
        assert_eq!(patched.name.as_deref(), Some("Ada"));
    }
    for engine in &engines {
        assert_eq!(count_rows(engine, "users", None).await, 1);
    }
}

#[tokio::test]
async fn test_session_filter_limits_the_flow() {
    let (engines, registry) = cluster(&["main", "replica", "audit"]);
    let users: Repository<User> = Repository::new(registry, users_schema()).unwrap();

    let flow = users.start_session::<u64>(&["audit"]).await.unwrap();
    assert_eq!(flow.len(), 1);
    let repo = users.clone();
    flow.pipe(move |session, _| {
        let repo = repo.clone();
        async move {
            let options = OperationOptions::new().session(session);
            repo.create(&user(1, "a@example.com"), &options).await?;
            Ok(1)
        }
    })
    .unwrap();
    flow.close_pipe().await.unwrap();

    assert_eq!(count_rows(&engines[0], "users", None).await, 0);
    assert_eq!(count_rows(&engines[1], "users", None).await, 0);
    assert_eq!(count_rows(&engines[2], "users", None).await, 1);

    let err = users.start_session::<u64>(&["missing"]).await.unwrap_err();
    assert!(matches!(err, RepoError::Configuration(_)));
}
