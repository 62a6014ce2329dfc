//! Pooled client behaviour against the in-memory mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use pgmux_client::{ClientEvent, Config, Error, IsolationLevel, PooledClient, StatementFormat};
use pgmux_testing::{MockConnector, MockServer};
use tokio::sync::broadcast;

fn client(server: &MockServer, max: u32) -> PooledClient<MockConnector> {
    PooledClient::new(server.connector(), Config::new().max_connections(max)).unwrap()
}

/// Error type for transaction bodies that fail for their own reasons.
#[derive(Debug)]
enum TestError {
    Client(Error),
    Content(&'static str),
}

impl From<Error> for TestError {
    fn from(err: Error) -> Self {
        Self::Client(err)
    }
}

async fn next_event(rx: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

// =============================================================================
// Single statements
// =============================================================================

#[tokio::test]
async fn test_query_releases_connection_on_success() {
    let server = MockServer::builder().build();
    let client = client(&server, 2);

    let result = client
        .query("select %L as %I", &[&"potato", &"name"])
        .await
        .unwrap();
    assert_eq!(result.first().and_then(|r| r.get("name")), Some("potato"));

    let status = client.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);

    client.query("select true;", &[]).await.unwrap();
    assert_eq!(server.connects(), 1, "idle connection should be reused");
}

#[tokio::test]
async fn test_failed_query_destroys_connection() {
    let server = MockServer::builder().build();
    let client = client(&server, 2);
    let mut events = client.events();

    let err = client.query("selec 1", &[]).await.unwrap_err();
    assert!(err.is_query_error());
    assert_eq!(err.code(), Some("42601"));

    assert_eq!(server.closes(), 1);
    assert_eq!(client.status().total, 0);

    match next_event(&mut events).await {
        ClientEvent::QueryError { statement, .. } => assert_eq!(statement, "selec 1"),
        event => panic!("unexpected event: {event:?}"),
    }

    client.query("select 1", &[]).await.unwrap();
    assert_eq!(server.connects(), 2, "a failed connection is never reused");
}

#[tokio::test]
async fn test_format_error_never_borrows_a_connection() {
    let server = MockServer::builder().build();
    let client = PooledClient::new(
        server.connector(),
        Config::new().format(StatementFormat::Disabled),
    )
    .unwrap();

    let err = client.query("select %s", &[&1]).await.unwrap_err();
    assert!(matches!(err, Error::Format(_)));
    assert_eq!(server.connects(), 0);

    client.query("select 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_frees_slot() {
    let server = MockServer::builder().fail_next_connects(1).build();
    let client = client(&server, 1);

    let err = client.query("select 1", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Connect(_)));
    assert!(err.is_transient());
    assert_eq!(client.status().in_use, 0);

    client.query("select 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_acquires_match_terminal_operations() {
    let server = MockServer::builder().build();
    let client = client(&server, 3);

    let mut tasks = Vec::new();
    for i in 0..24 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let statement = if i % 3 == 0 { "selec 1" } else { "select 1" };
            client.query(statement, &[]).await.is_ok()
        }));
    }

    let mut failures = 0;
    for task in tasks {
        if !task.await.unwrap() {
            failures += 1;
        }
    }

    let status = client.status();
    assert_eq!(failures, 8);
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 3);
    assert_eq!(server.closes(), 8, "every failed borrow destroys its connection");
    assert_eq!(server.connects() - server.closes(), u64::from(status.available));
    assert_eq!(server.sessions().len(), status.available as usize);
}

#[tokio::test]
async fn test_broken_idle_connection_is_discarded() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);
    let mut events = client.events();

    client.query("select 1", &[]).await.unwrap();
    let pid = server.sessions()[0];
    server.break_connection(pid);

    match next_event(&mut events).await {
        ClientEvent::ConnectionError { message } => assert!(message.contains("terminating")),
        event => panic!("unexpected event: {event:?}"),
    }

    client.query("select 1", &[]).await.unwrap();
    assert_eq!(server.connects(), 2);
    assert_ne!(server.sessions()[0], pid);
}

#[tokio::test]
async fn test_checkout_validation_replaces_dead_connection() {
    let server = MockServer::builder().build();
    let client = PooledClient::new(
        server.connector(),
        Config::new().max_connections(1).validate_connections(true),
    )
    .unwrap();

    client.query("select 1", &[]).await.unwrap();
    server.fail_statement_times("select true", "health check failed", 1);

    client.query("select 1", &[]).await.unwrap();
    assert_eq!(server.connects(), 2);
    assert_eq!(server.closes(), 1);
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_transaction_commits_and_releases() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    let count = client
        .transaction(|mut tx| {
            async move {
                tx.query("insert into %I values (%L)", &[&"t", &"v"]).await?;
                let rows = tx.query("select * from t", &[]).await?;
                Ok::<_, Error>(rows.len())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(server.table("t"), vec!["v".to_string()]);
    assert_eq!(server.count_statements("BEGIN TRANSACTION"), 1);
    assert_eq!(server.count_statements("COMMIT"), 1);
    assert_eq!(client.status().available, 1);
    assert_eq!(server.closes(), 0);
}

#[tokio::test]
async fn test_transaction_error_rolls_back_and_destroys() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    let result: Result<(), TestError> = client
        .transaction(|mut tx| {
            async move {
                tx.query("insert into t values (%L)", &[&"v"]).await?;
                Err(TestError::Content("stale read"))
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(TestError::Content("stale read"))));
    assert!(server.table("t").is_empty(), "no partial state");
    assert_eq!(server.count_statements("ROLLBACK"), 1);
    assert_eq!(server.closes(), 1);
    assert_eq!(client.status().total, 0);
}

#[tokio::test]
async fn test_rollback_failure_preserves_original_error() {
    let server = MockServer::builder()
        .fail_statement("ROLLBACK", "rollback exploded")
        .build();
    let client = client(&server, 1);
    let mut events = client.events();

    let result: Result<(), TestError> = client
        .transaction(|_tx| async move { Err(TestError::Content("bad input")) }.boxed())
        .await;

    assert!(matches!(result, Err(TestError::Content("bad input"))));
    assert_eq!(server.closes(), 1);

    let mut rollback_reported = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
        if let ClientEvent::RollbackFailed { message } = event {
            assert!(message.contains("rollback exploded"));
            rollback_reported = true;
        }
    }
    assert!(rollback_reported);
}

#[tokio::test]
async fn test_commit_failure_destroys_connection() {
    let server = MockServer::builder()
        .fail_statement("COMMIT", "could not serialize access")
        .build();
    let client = client(&server, 1);

    let result: Result<(), TestError> = client
        .transaction(|mut tx| {
            async move {
                tx.execute("insert into t values ('v')").await?;
                Ok(())
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(TestError::Client(Error::Query { .. }))));
    assert!(server.table("t").is_empty());
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_begin_failure_skips_body() {
    let server = MockServer::builder()
        .fail_statement("BEGIN", "out of shared memory")
        .build();
    let client = client(&server, 1);
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    let result = client
        .transaction(move |_tx| {
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await;

    assert!(result.is_err());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_transaction_with_isolation_and_savepoint() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    client
        .transaction_with_isolation(IsolationLevel::Serializable, |mut tx| {
            async move {
                tx.execute("insert into t values ('kept')").await?;
                let sp = tx.savepoint("before_extra").await?;
                tx.execute("insert into t values ('extra')").await?;
                tx.rollback_to(&sp).await?;
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(
        server.count_statements("BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE"),
        1
    );
    assert_eq!(server.count_statements("SAVEPOINT before_extra"), 1);
    assert_eq!(server.count_statements("ROLLBACK TO SAVEPOINT before_extra"), 1);
}

// =============================================================================
// Borrowing, stealing, closing
// =============================================================================

#[tokio::test]
async fn test_with_connection_uses_one_connection() {
    let server = MockServer::builder().build();
    let client = client(&server, 2);

    let pids = client
        .with_connection(|conn| {
            async move {
                let first = conn.get_ref().pid();
                conn.execute("select 1").await?;
                conn.query("select %L", &[&"x"]).await?;
                Ok::<_, Error>((first, conn.get_ref().pid()))
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(pids.0, pids.1);
    assert_eq!(client.status().available, 1);

    let result: Result<(), Error> = client
        .with_connection(|conn| async move { conn.execute("selec").await.map(|_| ()) }.boxed())
        .await;
    assert!(result.is_err());
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_with_connection_destroys_after_handled_statement_error() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    let (first, failed) = client
        .with_connection(|conn| {
            async move {
                let failed = conn.execute("selec 1").await.is_err();
                Ok::<_, Error>((conn.get_ref().pid(), failed))
            }
            .boxed()
        })
        .await
        .unwrap();
    assert!(failed);
    assert_eq!(server.closes(), 1);
    assert_eq!(client.status().total, 0);

    let second = client
        .with_connection(|conn| async move { Ok::<_, Error>(conn.get_ref().pid()) }.boxed())
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(server.connects(), 2);
}

#[tokio::test]
async fn test_transaction_with_handled_statement_error_is_not_committed() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    let result: Result<&str, Error> = client
        .transaction(|mut tx| {
            async move {
                tx.execute("insert into t values ('lost')").await?;
                let _ = tx.execute("selec 1").await;
                Ok("looked fine")
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(Error::TransactionAborted)));
    assert_eq!(server.count_statements("COMMIT"), 0);
    assert_eq!(server.count_statements("ROLLBACK"), 1);
    assert!(server.table("t").is_empty());
    assert_eq!(server.closes(), 1);
}

#[tokio::test]
async fn test_savepoint_recovery_allows_commit() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    client
        .transaction(|mut tx| {
            async move {
                tx.execute("insert into t values ('kept')").await?;
                let sp = tx.savepoint("attempt").await?;
                assert!(tx.execute("selec 1").await.is_err());
                tx.rollback_to(&sp).await?;
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(server.count_statements("COMMIT"), 1);
    assert_eq!(server.table("t"), vec!["kept".to_string()]);
    assert_eq!(server.closes(), 0);
    assert_eq!(client.status().available, 1);
}

#[tokio::test]
async fn test_pool_is_named_after_credentials() {
    let server = MockServer::builder().build();
    let client = PooledClient::new(
        server.connector(),
        Config::new().user("app").database("orders"),
    )
    .unwrap();
    assert_eq!(client.config().pool.display_name(), "app@orders");
}

#[tokio::test]
async fn test_stolen_connection_holds_capacity_until_closed() {
    let server = MockServer::builder().build();
    let client = client(&server, 1);

    let mut stolen = client.steal().await.unwrap();
    stolen.execute("LISTEN potato").await.unwrap();
    assert_eq!(client.status().stolen, 1);

    let blocked = tokio::time::timeout(Duration::from_millis(50), client.query("select 1", &[])).await;
    assert!(blocked.is_err(), "pool is exhausted while the connection is stolen");

    stolen.close().await;
    assert_eq!(server.closes(), 1);
    client.query("select 1", &[]).await.unwrap();
}

#[tokio::test]
async fn test_close_drains_pool() {
    let server = MockServer::builder().build();
    let client = client(&server, 2);

    client.query("select 1", &[]).await.unwrap();
    client.close().await;

    assert!(client.is_closed());
    assert_eq!(server.connects(), server.closes());
    assert!(matches!(
        client.query("select 1", &[]).await,
        Err(Error::PoolClosed)
    ));
}
