//! Connection pool implementation.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionFactory, ConnectionMetadata, ConnectionState};

/// A bounded connection pool.
///
/// Capacity is enforced by a fair semaphore holding `max_connections`
/// permits. Every borrowed or stolen connection owns one permit, so
/// `idle + in_use + stolen <= max_connections` holds at all times and
/// waiting callers are served in arrival order.
///
/// Cloning a `Pool` is cheap and yields a handle to the same pool.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<F::Connection>>,
    /// Signalled whenever a borrowed connection reaches a terminal state.
    released: Notify,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    /// Permits held by callers that are checking out or using a connection.
    in_use: u32,
    stolen: u32,
    closed: bool,
    next_id: u64,
}

struct Slot<C> {
    conn: C,
    meta: ConnectionMetadata,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new pool. No connections are opened until the first checkout.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError<F::Error>> {
        config.validate().map_err(PoolError::widen)?;

        tracing::debug!(
            pool = %config.display_name(),
            max_connections = config.max_connections,
            test_on_checkout = config.test_on_checkout,
            "creating connection pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    stolen: 0,
                    closed: false,
                    next_id: 1,
                }),
                released: Notify::new(),
            }),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection if one exists, otherwise opens a new one if
    /// the pool is under capacity. At capacity, this waits (without timeout)
    /// until another caller releases, destroys or closes a connection.
    pub async fn get(&self) -> Result<PooledConnection<F>, PoolError<F::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!(pool = %self.inner.config.display_name(), "acquiring connection from pool");

        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)?;

        let reservation = self.reserve(permit)?;
        self.checkout(reservation).await
    }

    /// Get an idle connection without waiting.
    ///
    /// Returns `Ok(None)` if the pool is at capacity or has no idle
    /// connection. Checkout validation is not applied.
    pub fn try_get(&self) -> Result<Option<PooledConnection<F>>, PoolError<F::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let permit = match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
        };

        let reservation = self.reserve(permit)?;
        loop {
            let slot = self.inner.state.lock().idle.pop_front();
            match slot {
                Some(slot) if !self.inner.factory.is_valid(&slot.conn) => {
                    tracing::debug!(connection_id = slot.meta.id, "discarding invalid idle connection");
                    self.destroy_detached(slot.conn);
                }
                Some(slot) => return Ok(Some(reservation.into_connection(slot))),
                None => return Ok(None),
            }
        }
    }

    /// Take a connection out of the pool permanently.
    ///
    /// The connection keeps counting against `max_connections` until it is
    /// closed with [`StolenConnection::close`], which destroys it directly.
    pub async fn steal(&self) -> Result<StolenConnection<F>, PoolError<F::Error>> {
        let conn = self.get().await?;
        Ok(conn.into_stolen())
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let available = state.idle.len() as u32;
        PoolStatus {
            available,
            in_use: state.in_use,
            stolen: state.stolen,
            total: available + state.in_use + state.stolen,
            max: self.inner.config.max_connections,
        }
    }

    /// Close the pool.
    ///
    /// New checkouts (including callers already queued for a permit) fail
    /// with [`PoolError::PoolClosed`]. This waits until every borrowed
    /// connection has been released or destroyed, then destroys all idle
    /// connections. Stolen connections belong to their holder and are left
    /// alone.
    pub async fn close(&self) {
        self.inner.state.lock().closed = true;
        tracing::debug!(pool = %self.inner.config.display_name(), "draining connection pool");

        loop {
            let released = self.inner.released.notified();
            if self.inner.state.lock().in_use == 0 {
                break;
            }
            released.await;
        }

        let idle: Vec<_> = self.inner.state.lock().idle.drain(..).collect();
        let destroyed = idle.len();
        futures_util::future::join_all(
            idle.into_iter()
                .map(|slot| self.inner.factory.destroy(slot.conn)),
        )
        .await;

        self.inner.semaphore.close();
        tracing::info!(pool = %self.inner.config.display_name(), destroyed, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    fn reserve(&self, permit: OwnedSemaphorePermit) -> Result<Reservation<'_, F>, PoolError<F::Error>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        state.in_use += 1;
        Ok(Reservation {
            pool: self,
            permit: Some(permit),
        })
    }

    async fn checkout(
        &self,
        reservation: Reservation<'_, F>,
    ) -> Result<PooledConnection<F>, PoolError<F::Error>> {
        loop {
            let slot = self.inner.state.lock().idle.pop_front();
            let Some(mut slot) = slot else {
                return self.open(reservation).await;
            };

            if !self.inner.factory.is_valid(&slot.conn) {
                tracing::debug!(connection_id = slot.meta.id, "discarding invalid idle connection");
                self.inner.factory.destroy(slot.conn).await;
                continue;
            }

            if self.inner.config.test_on_checkout {
                slot.meta.state = ConnectionState::Checking;
                if !self.inner.factory.validate(&mut slot.conn).await {
                    tracing::debug!(
                        connection_id = slot.meta.id,
                        "connection failed validation, replacing"
                    );
                    self.inner.factory.destroy(slot.conn).await;
                    continue;
                }
                slot.meta.mark_checked();
            }

            return Ok(reservation.into_connection(slot));
        }
    }

    async fn open(
        &self,
        reservation: Reservation<'_, F>,
    ) -> Result<PooledConnection<F>, PoolError<F::Error>> {
        match self.inner.factory.create().await {
            Ok(conn) => {
                let id = {
                    let mut state = self.inner.state.lock();
                    let id = state.next_id;
                    state.next_id += 1;
                    id
                };
                tracing::debug!(pool = %self.inner.config.display_name(), connection_id = id, "opened new connection");
                Ok(reservation.into_connection(Slot {
                    conn,
                    meta: ConnectionMetadata::new(id),
                }))
            }
            Err(e) => {
                tracing::warn!(pool = %self.inner.config.display_name(), error = %e, "failed to create connection");
                Err(PoolError::ConnectionCreation(e))
            }
        }
    }

    /// Return a permit held by a borrower.
    fn finish_borrow(&self, permit: OwnedSemaphorePermit) {
        {
            let mut state = self.inner.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
        drop(permit);
        self.inner.released.notify_waiters();
    }

    fn finish_steal(&self, permit: OwnedSemaphorePermit) {
        {
            let mut state = self.inner.state.lock();
            state.stolen = state.stolen.saturating_sub(1);
        }
        drop(permit);
        self.inner.released.notify_waiters();
    }

    /// Destroy a connection from a synchronous context.
    fn destroy_detached(&self, conn: F::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.clone();
                handle.spawn(async move {
                    pool.inner.factory.destroy(conn).await;
                });
            }
            Err(_) => {
                tracing::warn!("no runtime available, dropping connection without teardown");
                drop(conn);
            }
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

/// A semaphore permit counted in `in_use` but not yet bound to a connection.
///
/// Dropping it (failed creation, cancelled checkout) frees the slot.
struct Reservation<'a, F: ConnectionFactory> {
    pool: &'a Pool<F>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> Reservation<'_, F> {
    fn into_connection(mut self, mut slot: Slot<F::Connection>) -> PooledConnection<F> {
        slot.meta.mark_checkout();
        tracing::trace!(connection_id = slot.meta.id, "connection checked out");
        PooledConnection {
            pool: self.pool.clone(),
            slot: Some(slot),
            permit: self.permit.take(),
        }
    }
}

impl<F: ConnectionFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.finish_borrow(permit);
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently borrowed (or being opened).
    pub in_use: u32,
    /// Number of connections permanently taken out of the pool.
    pub stolen: u32,
    /// Total number of connections counted against capacity.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection borrowed from the pool.
///
/// Every borrow must end in exactly one of [`release`](Self::release) (the
/// work succeeded and the connection is reusable) or
/// [`destroy`](Self::destroy) (the connection saw an error and its state is
/// unknown). Dropping the guard without either destroys the connection.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Pool<F>,
    slot: Option<Slot<F::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.slot.as_ref().map(|slot| &slot.meta))
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Get the pool's metadata for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.slot().meta
    }

    /// Get the connection's pool-assigned identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot().meta.id
    }

    /// Return the connection to the idle set.
    ///
    /// A connection the factory reports as invalid is destroyed instead.
    pub async fn release(mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };

        if !self.pool.inner.factory.is_valid(&slot.conn) {
            tracing::debug!(connection_id = slot.meta.id, "released connection is invalid, destroying");
            self.pool.inner.factory.destroy(slot.conn).await;
            self.finish();
            return;
        }

        slot.meta.mark_checkin();
        tracing::trace!(connection_id = slot.meta.id, "returning connection to pool");
        self.pool.inner.state.lock().idle.push_back(slot);
        self.finish();
    }

    /// Remove the connection from the pool and tear it down.
    pub async fn destroy(mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(connection_id = slot.meta.id, "destroying connection");
            self.pool.inner.factory.destroy(slot.conn).await;
        }
        self.finish();
    }

    /// Convert this borrow into a permanently stolen connection.
    pub fn into_stolen(mut self) -> StolenConnection<F> {
        let mut slot = self.slot.take();
        let permit = self.permit.take();
        if let Some(slot) = slot.as_mut() {
            slot.meta.mark_stolen();
            tracing::debug!(connection_id = slot.meta.id, "connection stolen from pool");
        }
        {
            let mut state = self.pool.inner.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            state.stolen += 1;
        }
        self.pool.inner.released.notify_waiters();
        StolenConnection {
            pool: self.pool.clone(),
            slot,
            permit,
        }
    }

    fn finish(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.pool.finish_borrow(permit);
        }
    }

    fn slot(&self) -> &Slot<F::Connection> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled connection used after release"),
        }
    }

    fn slot_mut(&mut self) -> &mut Slot<F::Connection> {
        match &mut self.slot {
            Some(slot) => slot,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot_mut().conn
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(
                connection_id = slot.meta.id,
                "pooled connection dropped without release, destroying"
            );
            self.pool.destroy_detached(slot.conn);
        }
        self.finish();
    }
}

/// A connection permanently removed from the pool.
///
/// It is never returned to the idle set. [`close`](Self::close) destroys it
/// and gives its slot back to the pool.
pub struct StolenConnection<F: ConnectionFactory> {
    pool: Pool<F>,
    slot: Option<Slot<F::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> StolenConnection<F> {
    /// Get the pool's metadata for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.slot().meta
    }

    /// Get the connection's pool-assigned identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.slot().meta.id
    }

    /// Destroy the connection directly, bypassing the idle set.
    pub async fn close(mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(connection_id = slot.meta.id, "closing stolen connection");
            self.pool.inner.factory.destroy(slot.conn).await;
        }
        if let Some(permit) = self.permit.take() {
            self.pool.finish_steal(permit);
        }
    }

    fn slot(&self) -> &Slot<F::Connection> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("stolen connection used after close"),
        }
    }

    fn slot_mut(&mut self) -> &mut Slot<F::Connection> {
        match &mut self.slot {
            Some(slot) => slot,
            None => unreachable!("stolen connection used after close"),
        }
    }
}

impl<F: ConnectionFactory> Deref for StolenConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<F: ConnectionFactory> DerefMut for StolenConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot_mut().conn
    }
}

impl<F: ConnectionFactory> Drop for StolenConnection<F> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::debug!(connection_id = slot.meta.id, "stolen connection dropped, destroying");
            self.pool.destroy_detached(slot.conn);
        }
        if let Some(permit) = self.permit.take() {
            self.pool.finish_steal(permit);
        }
    }
}
