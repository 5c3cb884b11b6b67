//! ResourcePool: a bounded pool of connections with blocking acquire.
//!
//! `current_size` counts connections that are live or reserved (idle plus
//! checked out plus slots being filled) and never exceeds `max_size`.
//!
//! ```text
//! acquire()
//!   → idle connection available  → ping → ok: return it
//!                                        → dead: close, create replacement in the same slot
//!   → capacity left              → reserve slot → create (slot released on failure)
//!   → saturated                  → queue as waiter (FIFO), count "pool maxed"
//!
//! release(Some(conn))
//!   → waiter queued              → hand the connection over directly
//!   → idle queue has room        → push to idle
//!   → idle queue full            → wait up to release_timeout, then close it
//!
//! release(None)                  → the slot is handed to the first waiter,
//!                                  or current_size -= 1
//! ```
//!
//! Waiters are served strictly in arrival order: a released connection or a
//! freed slot goes to the oldest waiter before any newcomer can see it.
//!
//! `close_all()` resets `current_size` to zero while some connections may
//! still be checked out. Those are tracked as *retired*: each later release
//! retires one of them, closing the connection instead of queueing it, so
//! the idle queue never outgrows `current_size`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::PoolResult;
use crate::factory::ConnectionFactory;

/// Default bounded wait for `release()` on a full idle queue.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a waiter receives when it reaches the head of the queue.
enum Grant<C> {
    /// An idle connection, still holding its slot.
    Idle(C),
    /// A reserved slot to fill with a fresh connection.
    Slot,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    size: usize,
    /// Connections or reservations outstanding at the last `close_all()`,
    /// no longer counted in `size`.
    retired: usize,
    waiters: VecDeque<oneshot::Sender<Grant<C>>>,
}

/// Raw counters, updated lock-free.
#[derive(Debug, Default)]
struct PoolMeters {
    acquire_calls: AtomicU64,
    release_calls: AtomicU64,
    pool_maxed: AtomicU64,
    created: AtomicU64,
    create_failures: AtomicU64,
    pinged: AtomicU64,
    ping_failures: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    /// Live plus reserved connections.
    pub current_size: usize,
    pub idle: usize,
    /// Acquirers queued on a saturated pool.
    pub waiting: usize,
    /// Checked-out connections left over from the last `close_all()`.
    pub retired: usize,
    pub acquire_calls: u64,
    pub release_calls: u64,
    /// Acquire calls that had to wait because the pool was saturated.
    pub pool_maxed: u64,
    pub created: u64,
    pub create_failures: u64,
    pub pinged: u64,
    pub ping_failures: u64,
    pub closed: u64,
}

/// A bounded pool of connections produced by a [`ConnectionFactory`].
pub struct ResourcePool<F: ConnectionFactory> {
    factory: F,
    max_size: usize,
    release_timeout: Duration,
    /// Label used in log lines.
    label: String,
    state: Mutex<PoolState<F::Connection>>,
    /// Signalled whenever the idle queue loses an entry.
    space: Notify,
    meters: PoolMeters,
}

impl<F: ConnectionFactory> ResourcePool<F> {
    /// Create an empty pool holding at most `max_size` connections.
    ///
    /// A `max_size` of zero is raised to one.
    pub fn new(factory: F, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            factory,
            max_size,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            label: String::from("pool"),
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(max_size),
                size: 0,
                retired: 0,
                waiters: VecDeque::new(),
            }),
            space: Notify::new(),
            meters: PoolMeters::default(),
        }
    }

    /// Builder method: set how long `release()` waits on a full idle queue.
    pub fn with_release_timeout(self, release_timeout: Duration) -> Self {
        Self {
            release_timeout,
            ..self
        }
    }

    /// Builder method: set the label used in log lines.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn current_size(&self) -> usize {
        self.lock().size
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a connection, waiting as long as it takes if the pool is
    /// saturated. Wrap in `tokio::time::timeout` for a bounded wait.
    pub async fn acquire(&self) -> PoolResult<F::Connection> {
        self.meters.acquire_calls.fetch_add(1, Ordering::Relaxed);
        let mut counted_maxed = false;

        loop {
            let next = {
                let mut state = self.lock();
                if let Some(conn) = state.idle.pop_front() {
                    Ok(Grant::Idle(conn))
                } else if state.size < self.max_size {
                    state.size += 1;
                    Ok(Grant::Slot)
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Err(rx)
                }
            };

            let grant = match next {
                Ok(grant) => {
                    if matches!(grant, Grant::Idle(_)) {
                        self.space.notify_one();
                    }
                    grant
                }
                Err(rx) => {
                    if !counted_maxed {
                        counted_maxed = true;
                        self.meters.pool_maxed.fetch_add(1, Ordering::Relaxed);
                        debug!(pool = %self.label, max_size = self.max_size, "pool maxed, waiting");
                    }
                    let mut waiter = Waiter {
                        pool: self,
                        rx: Some(rx),
                    };
                    match waiter.wait().await {
                        Some(grant) => grant,
                        // The sender went away without a grant; queue again.
                        None => continue,
                    }
                }
            };

            return match grant {
                Grant::Idle(conn) => self.fill_slot(Some(conn)).await,
                Grant::Slot => self.fill_slot(None).await,
            };
        }
    }

    /// Return a connection. `None` reports a dead connection: its slot is
    /// freed without touching the idle queue.
    ///
    /// While connections retired by `close_all()` are outstanding, each
    /// release settles one of them instead: a live connection is closed and
    /// `None` writes the retired entry off.
    pub async fn release(&self, conn: Option<F::Connection>) {
        self.meters.release_calls.fetch_add(1, Ordering::Relaxed);

        let Some(mut conn) = conn else {
            self.free_slot();
            debug!(pool = %self.label, "released dead connection slot");
            return;
        };

        if self.take_retired() {
            debug!(pool = %self.label, "closing connection retired by close_all");
            self.factory.close_connection(conn).await;
            self.meters.closed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // The idle queue only fills up when every counted connection is
        // already idle, so a connection waiting here holds no slot.
        let deadline = Instant::now() + self.release_timeout;
        loop {
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.offer(conn) {
                Ok(()) => return,
                Err(back) => conn = back,
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                debug!(pool = %self.label, "idle queue full, closing surplus connection");
                self.factory.close_connection(conn).await;
                self.meters.closed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Close every idle connection and reset `current_size` to zero.
    ///
    /// Checked-out connections are left alone until they come back through
    /// `release()`, which closes them.
    pub async fn close_all(&self) {
        let drained: Vec<F::Connection> = {
            let mut state = self.lock();
            let drained: Vec<F::Connection> = state.idle.drain(..).collect();
            state.retired += state.size.saturating_sub(drained.len());
            state.size = 0;
            // Capacity is free again; queued acquirers may dial.
            while state.size < self.max_size {
                match wake_first(&mut state.waiters, Grant::Slot) {
                    Ok(()) => state.size += 1,
                    Err(_) => break,
                }
            }
            drained
        };
        self.space.notify_waiters();

        let closed = drained.len();
        for conn in drained {
            self.factory.close_connection(conn).await;
        }
        self.meters.closed.fetch_add(closed as u64, Ordering::Relaxed);
        info!(pool = %self.label, closed, "closed all idle connections");
    }

    pub fn stats(&self) -> PoolStats {
        let (current_size, idle, waiting, retired) = {
            let state = self.lock();
            (state.size, state.idle.len(), state.waiters.len(), state.retired)
        };
        let m = &self.meters;
        PoolStats {
            max_size: self.max_size,
            current_size,
            idle,
            waiting,
            retired,
            acquire_calls: m.acquire_calls.load(Ordering::Relaxed),
            release_calls: m.release_calls.load(Ordering::Relaxed),
            pool_maxed: m.pool_maxed.load(Ordering::Relaxed),
            created: m.created.load(Ordering::Relaxed),
            create_failures: m.create_failures.load(Ordering::Relaxed),
            pinged: m.pinged.load(Ordering::Relaxed),
            ping_failures: m.ping_failures.load(Ordering::Relaxed),
            closed: m.closed.load(Ordering::Relaxed),
        }
    }

    /// Turn a held slot into a usable connection: validate `stale` if given,
    /// otherwise (or if it fails its ping) create a new one. The slot is
    /// released if this fails or is cancelled.
    async fn fill_slot(&self, stale: Option<F::Connection>) -> PoolResult<F::Connection> {
        let mut reservation = SlotReservation {
            pool: self,
            armed: true,
        };

        if let Some(mut conn) = stale {
            self.meters.pinged.fetch_add(1, Ordering::Relaxed);
            if self.factory.ping_connection(&mut conn).await {
                reservation.armed = false;
                return Ok(conn);
            }
            self.meters.ping_failures.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %self.label, "idle connection failed ping, replacing");
            self.factory.close_connection(conn).await;
            self.meters.closed.fetch_add(1, Ordering::Relaxed);
        }

        match self.factory.create_connection().await {
            Ok(conn) => {
                reservation.armed = false;
                self.meters.created.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.label, "created connection");
                Ok(conn)
            }
            Err(e) => {
                self.meters.create_failures.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.label, error = %e, "connection create failed, slot released");
                Err(e)
            }
        }
    }

    /// Hand `conn` to the oldest waiter, else queue it as idle. Gives the
    /// connection back if the idle queue is full.
    fn offer(&self, conn: F::Connection) -> Result<(), F::Connection> {
        let mut state = self.lock();
        match wake_first(&mut state.waiters, Grant::Idle(conn)) {
            Ok(()) => Ok(()),
            Err(Grant::Idle(conn)) => {
                if state.idle.len() < self.max_size {
                    state.idle.push_back(conn);
                    Ok(())
                } else {
                    Err(conn)
                }
            }
            // wake_first returns exactly what it was given.
            Err(Grant::Slot) => Ok(()),
        }
    }

    /// Consume one retired connection, if any are outstanding.
    fn take_retired(&self) -> bool {
        let mut state = self.lock();
        if state.retired > 0 {
            state.retired -= 1;
            true
        } else {
            false
        }
    }

    /// Give a slot to the oldest waiter, or shrink `current_size`.
    /// Retired reservations are written off first.
    fn free_slot(&self) {
        let mut state = self.lock();
        if state.retired > 0 {
            state.retired -= 1;
            return;
        }
        if wake_first(&mut state.waiters, Grant::Slot).is_err() {
            state.size = state.size.saturating_sub(1);
        }
    }

    /// Put back a grant whose waiter was cancelled before it could use it.
    fn restore(&self, grant: Grant<F::Connection>) {
        match grant {
            Grant::Idle(conn) => {
                // close_connection is async and this runs inside Drop, so a
                // connection that cannot be requeued is dropped unclosed.
                // That only happens to one retired by close_all(): a live
                // granted connection holds a slot, so the offer has room.
                if self.take_retired() {
                    debug!(pool = %self.label, "dropping retired connection from cancelled waiter");
                    drop(conn);
                } else if let Err(conn) = self.offer(conn) {
                    drop(conn);
                    self.free_slot();
                }
            }
            Grant::Slot => self.free_slot(),
        }
    }
}

/// Send `grant` to the first waiter still listening. Waiters that gave up
/// are skipped. Returns the grant if nobody took it.
fn wake_first<C>(
    waiters: &mut VecDeque<oneshot::Sender<Grant<C>>>,
    mut grant: Grant<C>,
) -> Result<(), Grant<C>> {
    while let Some(tx) = waiters.pop_front() {
        match tx.send(grant) {
            Ok(()) => return Ok(()),
            Err(back) => grant = back,
        }
    }
    Err(grant)
}

/// A queued acquirer. If dropped after being granted a connection or slot
/// but before taking it, the grant goes back to the pool.
struct Waiter<'a, F: ConnectionFactory> {
    pool: &'a ResourcePool<F>,
    rx: Option<oneshot::Receiver<Grant<F::Connection>>>,
}

impl<F: ConnectionFactory> Waiter<'_, F> {
    async fn wait(&mut self) -> Option<Grant<F::Connection>> {
        let rx = self.rx.as_mut()?;
        let grant = rx.await.ok();
        self.rx = None;
        grant
    }
}

impl<F: ConnectionFactory> Drop for Waiter<'_, F> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(grant) = rx.try_recv() {
                self.pool.restore(grant);
            }
        }
    }
}

/// Frees its slot on drop unless disarmed.
struct SlotReservation<'a, F: ConnectionFactory> {
    pool: &'a ResourcePool<F>,
    armed: bool,
}

impl<F: ConnectionFactory> Drop for SlotReservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.free_slot();
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("label", &self.label)
            .field("max_size", &self.max_size)
            .field("current_size", &self.current_size())
            .finish_non_exhaustive()
    }
}
