//! Connection pool behaviour tests against an in-process counting factory.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use pgmux_pool::{ConnectionFactory, Pool, PoolConfig, PoolError};
use proptest::prelude::*;
use tokio_test::{assert_pending, assert_ready_ok, task};

#[derive(Debug)]
struct CreateError;

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection refused")
    }
}

impl std::error::Error for CreateError {}

struct TestConn {
    serial: u64,
    broken: Arc<AtomicBool>,
}

#[derive(Default)]
struct CountingFactory {
    created: AtomicU64,
    destroyed: AtomicU64,
    validated: AtomicU64,
    fail_creates: AtomicU32,
    fail_validations: AtomicU32,
}

impl CountingFactory {
    fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait::async_trait]
impl ConnectionFactory for CountingFactory {
    type Connection = TestConn;
    type Error = CreateError;

    async fn create(&self) -> Result<TestConn, CreateError> {
        if take_one(&self.fail_creates) {
            return Err(CreateError);
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TestConn {
            serial,
            broken: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn validate(&self, _conn: &mut TestConn) -> bool {
        self.validated.fetch_add(1, Ordering::SeqCst);
        !take_one(&self.fail_validations)
    }

    async fn destroy(&self, _conn: TestConn) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_valid(&self, conn: &TestConn) -> bool {
        !conn.broken.load(Ordering::SeqCst)
    }
}

fn pool(max: u32) -> Pool<CountingFactory> {
    Pool::new(
        CountingFactory::default(),
        PoolConfig::new().max_connections(max),
    )
    .unwrap()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Checkout and return
// =============================================================================

#[tokio::test]
async fn test_pool_rejects_zero_capacity() {
    let result = Pool::new(
        CountingFactory::default(),
        PoolConfig::new().max_connections(0),
    );
    assert!(matches!(result, Err(PoolError::Configuration(_))));
}

#[tokio::test]
async fn test_released_connection_is_reused() {
    let pool = pool(2);

    let conn = pool.get().await.unwrap();
    let id = conn.id();
    assert_eq!(pool.status().in_use, 1);
    conn.release().await;

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);

    let conn = pool.get().await.unwrap();
    assert_eq!(conn.id(), id, "should reuse the idle connection");
    assert_eq!(conn.metadata().checkout_count, 2);
    conn.release().await;

    assert_eq!(pool.factory().created(), 1);
}

#[tokio::test]
async fn test_destroyed_connection_is_never_handed_out_again() {
    let pool = pool(2);

    let conn = pool.get().await.unwrap();
    let first = conn.serial;
    conn.destroy().await;

    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.status().total, 0);

    let conn = pool.get().await.unwrap();
    assert_ne!(conn.serial, first);
    conn.release().await;
}

#[tokio::test]
async fn test_dropped_connection_is_destroyed() {
    let pool = pool(1);

    let conn = pool.get().await.unwrap();
    drop(conn);
    settle().await;

    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().available, 0);
}

#[tokio::test]
async fn test_invalid_connection_is_destroyed_on_release() {
    let pool = pool(1);

    let conn = pool.get().await.unwrap();
    conn.broken.store(true, Ordering::SeqCst);
    conn.release().await;

    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.status().available, 0);
}

#[tokio::test]
async fn test_try_get() {
    let pool = pool(1);

    assert!(pool.try_get().unwrap().is_none(), "no idle connections yet");

    pool.get().await.unwrap().release().await;
    let conn = pool.try_get().unwrap().expect("idle connection");
    assert!(pool.try_get().unwrap().is_none(), "pool at capacity");
    conn.release().await;
}

// =============================================================================
// Capacity and waiting
// =============================================================================

#[tokio::test]
async fn test_waiter_is_served_when_connection_released() {
    let pool = pool(1);
    let held = pool.get().await.unwrap();

    let waiting_pool = pool.clone();
    let mut waiter = task::spawn(async move { waiting_pool.get().await });
    assert_pending!(waiter.poll());

    held.release().await;
    assert!(waiter.is_woken());
    let conn = assert_ready_ok!(waiter.poll());
    assert_eq!(pool.factory().created(), 1);
    conn.release().await;
}

#[tokio::test]
async fn test_waiter_is_served_when_connection_destroyed() {
    let pool = pool(1);
    let held = pool.get().await.unwrap();

    let waiting_pool = pool.clone();
    let mut waiter = task::spawn(async move { waiting_pool.get().await });
    assert_pending!(waiter.poll());

    held.destroy().await;
    let conn = assert_ready_ok!(waiter.poll());
    assert_eq!(pool.factory().created(), 2);
    conn.release().await;
}

#[tokio::test]
async fn test_create_failure_frees_slot() {
    let pool = pool(1);
    pool.factory().fail_creates.store(1, Ordering::SeqCst);

    let err = pool.get().await.err().expect("creation should fail");
    assert!(matches!(err, PoolError::ConnectionCreation(CreateError)));
    assert_eq!(pool.status().in_use, 0);

    let conn = pool.get().await.unwrap();
    conn.release().await;
}

#[tokio::test]
async fn test_failed_validation_replaces_connection() {
    let pool = Pool::new(
        CountingFactory::default(),
        PoolConfig::new().max_connections(1).test_on_checkout(true),
    )
    .unwrap();

    let conn = pool.get().await.unwrap();
    let first = conn.serial;
    conn.release().await;

    pool.factory().fail_validations.store(1, Ordering::SeqCst);
    let conn = pool.get().await.unwrap();

    assert_ne!(conn.serial, first);
    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.factory().validated.load(Ordering::SeqCst), 1);
    conn.release().await;
}

// =============================================================================
// Stealing
// =============================================================================

#[tokio::test]
async fn test_stolen_connection_counts_against_capacity() {
    let pool = pool(1);

    let stolen = pool.steal().await.unwrap();
    let status = pool.status();
    assert_eq!(status.stolen, 1);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, 1);
    assert!(pool.try_get().unwrap().is_none());

    stolen.close().await;
    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.status().stolen, 0);

    let conn = pool.get().await.unwrap();
    conn.release().await;
}

#[tokio::test]
async fn test_stolen_connection_is_not_returned_to_idle() {
    let pool = pool(2);

    let stolen = pool.steal().await.unwrap();
    let stolen_serial = stolen.serial;

    let conn = pool.get().await.unwrap();
    assert_ne!(conn.serial, stolen_serial);
    conn.release().await;

    stolen.close().await;
    assert_eq!(pool.status().available, 1);
}

// =============================================================================
// Draining
// =============================================================================

#[tokio::test]
async fn test_close_waits_for_borrowed_connections() {
    let pool = pool(2);
    pool.get().await.unwrap().release().await;
    let held = pool.get().await.unwrap();

    let closing = pool.clone();
    let closer = tokio::spawn(async move { closing.close().await });
    settle().await;
    assert!(!closer.is_finished(), "close must wait for the borrower");
    assert!(pool.is_closed());

    held.release().await;
    closer.await.unwrap();

    assert_eq!(pool.factory().destroyed(), 1);
    assert_eq!(pool.status().total, 0);
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_close_fails_queued_waiters() {
    let pool = pool(1);
    let held = pool.get().await.unwrap();

    let waiting_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiting_pool.get().await.map(|_| ()) });
    settle().await;

    let closing = pool.clone();
    let closer = tokio::spawn(async move { closing.close().await });
    settle().await;

    held.release().await;
    closer.await.unwrap();
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.factory().created(), pool.factory().destroyed());
}

#[tokio::test]
async fn test_close_leaves_stolen_connections_to_holder() {
    let pool = pool(2);
    let stolen = pool.steal().await.unwrap();

    pool.close().await;
    assert_eq!(pool.factory().destroyed(), 0);

    stolen.close().await;
    assert_eq!(pool.factory().destroyed(), 1);
}

// =============================================================================
// Accounting property
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Release,
    Destroy,
    Drop,
    Steal,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Release),
        Just(Op::Destroy),
        Just(Op::Drop),
        Just(Op::Steal),
    ]
}

proptest! {
    #[test]
    fn prop_every_checkout_ends_in_one_terminal_state(
        max in 1u32..4,
        ops in proptest::collection::vec(op(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let pool = pool(max);
            let mut stolen = Vec::new();

            for op in ops {
                if stolen.len() as u32 == max {
                    let conn: pgmux_pool::StolenConnection<CountingFactory> = stolen.remove(0);
                    conn.close().await;
                }
                let conn = pool.get().await.unwrap();
                match op {
                    Op::Release => conn.release().await,
                    Op::Destroy => conn.destroy().await,
                    Op::Drop => drop(conn),
                    Op::Steal => stolen.push(conn.into_stolen()),
                }
                settle().await;

                let status = pool.status();
                assert_eq!(status.in_use, 0);
                assert!(status.total <= max);
                assert_eq!(status.stolen as usize, stolen.len());
                assert_eq!(
                    pool.factory().created() - pool.factory().destroyed(),
                    u64::from(status.available + status.stolen)
                );
            }

            for conn in stolen {
                conn.close().await;
            }
            pool.close().await;
            assert_eq!(pool.factory().created(), pool.factory().destroyed());
        });
    }
}
