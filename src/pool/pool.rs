//! Slot-based connection pool for a single upstream URI.
//!
//! # Responsibilities
//! - Hand out leases on open connections, preferring reuse over dialing
//! - Reserve a slot before dialing so capacity is never oversubscribed
//! - Expire idle connections and evict dead ones lazily on access
//! - Queue borrowers up to a configured cap, or fail fast when it is zero
//! - Summarize pressure as an [`Availability`] for host selection
//!
//! # Design Decisions
//! - One mutex per slot; no lock is ever held across an await point
//! - A slot carries a generation counter so a lease that outlives its
//!   tenancy restores as a no-op instead of corrupting a newer tenant
//! - `available` only reads; eviction and expiry happen on borrow paths

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::pool::connection::{ConnectionLease, PooledConnection};
use crate::pool::maker::{ConnectionMaker, MakeError};

/// Tuning knobs for one pool. Shared by every pool the gateway builds.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Number of slots, i.e. the hard cap on open connections.
    pub max_connections: usize,
    /// Concurrent borrowers allowed on one multiplex-capable connection.
    pub max_multiplex_borrowers: usize,
    /// Borrowers allowed to queue for a free slot. Zero means fail fast.
    pub max_queue_size: usize,
    /// Connections idle longer than this are replaced on next access.
    pub idle_expiry: Duration,
    /// Budget for dialing and handshaking a new connection.
    pub connect_timeout: Duration,
    /// How long a connect failure keeps the pool reporting `Problem`.
    pub problem_retry: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_multiplex_borrowers: 4,
            max_queue_size: 0,
            idle_expiry: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            problem_retry: Duration::from_secs(30),
        }
    }
}

/// Pressure summary consumed by host selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// At least one connection can be handed out without queueing.
    Available,
    /// Every slot is claimed but the wait queue still has room.
    Full,
    /// Every slot is claimed and the wait queue is saturated.
    FullQueue,
    /// A connect failure happened within the retry window.
    Problem,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Full => "full",
            Availability::FullQueue => "full_queue",
            Availability::Problem => "problem",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a borrow attempt failed.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection pool for {uri} is at capacity")]
    AtCapacity { uri: String },

    #[error("connection pool wait queue for {uri} is full")]
    QueueFull { uri: String },

    #[error("timed out waiting for a pooled connection to {uri}")]
    BorrowTimeout { uri: String },

    #[error("timed out connecting to {uri}")]
    ConnectTimeout { uri: String },

    #[error("failed to connect to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: MakeError,
    },
}

/// Point-in-time counters for operators.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub open: usize,
    pub borrowed: usize,
    pub waiting: usize,
    pub created_total: u64,
    pub expired_total: u64,
    pub evicted_total: u64,
}

struct OccupiedSlot<C> {
    conn: Arc<C>,
    borrowers: usize,
    idle_since: Instant,
}

enum SlotState<C> {
    Empty,
    Reserved,
    Occupied(OccupiedSlot<C>),
}

struct SlotInner<C> {
    state: SlotState<C>,
    generation: u64,
}

struct Slot<C> {
    inner: Mutex<SlotInner<C>>,
}

impl<C> Slot<C> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Empty,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<C>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Outcome of one lock-scoped scan over the slots.
enum Claim<C: PooledConnection> {
    Reuse(ConnectionLease<C>),
    Reserved { slot: usize, generation: u64 },
    Saturated,
}

/// Shared pool state. Leases hold an `Arc` to this so restores outlive the
/// owning [`ConnectionPool`] handle if needed.
pub(crate) struct PoolCore<C: PooledConnection> {
    uri: String,
    settings: PoolSettings,
    slots: Box<[Slot<C>]>,
    waiting: AtomicUsize,
    slot_freed: Notify,
    last_connect_failure: Mutex<Option<Instant>>,
    created_total: AtomicU64,
    expired_total: AtomicU64,
    evicted_total: AtomicU64,
}

impl<C: PooledConnection> PoolCore<C> {
    fn failure_slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_connect_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn note_connect_failure(&self) {
        *self.failure_slot() = Some(Instant::now());
    }

    fn clear_connect_failure(&self) {
        *self.failure_slot() = None;
    }

    fn in_problem_window(&self) -> bool {
        match *self.failure_slot() {
            Some(at) => at.elapsed() < self.settings.problem_retry,
            None => false,
        }
    }

    /// Scan the slots once. Reuses the first compatible open connection,
    /// otherwise reserves the first free slot for the caller to fill. Dead
    /// and idle-expired connections encountered along the way are evicted.
    fn try_claim(self: &Arc<Self>) -> Claim<C> {
        loop {
            let mut first_free: Option<usize> = None;
            for (index, slot) in self.slots.iter().enumerate() {
                let mut inner = slot.lock();
                match &mut inner.state {
                    SlotState::Empty => {
                        if first_free.is_none() {
                            first_free = Some(index);
                        }
                    }
                    SlotState::Reserved => {}
                    SlotState::Occupied(occupied) => {
                        let dead = !occupied.conn.is_open();
                        let expired = !dead
                            && occupied.borrowers == 0
                            && occupied.idle_since.elapsed() >= self.settings.idle_expiry;
                        if dead || expired {
                            occupied.conn.close();
                            inner.state = SlotState::Empty;
                            if dead {
                                self.evicted_total.fetch_add(1, Ordering::Relaxed);
                                metrics::pool_connection_closed(&self.uri, "dead");
                            } else {
                                self.expired_total.fetch_add(1, Ordering::Relaxed);
                                metrics::pool_connection_closed(&self.uri, "expired");
                            }
                            if first_free.is_none() {
                                first_free = Some(index);
                            }
                        } else if occupied.conn.is_multiplex() {
                            if occupied.borrowers < self.settings.max_multiplex_borrowers {
                                occupied.borrowers += 1;
                                let conn = Arc::clone(&occupied.conn);
                                return Claim::Reuse(ConnectionLease::new(
                                    Arc::clone(self),
                                    conn,
                                    index,
                                    inner.generation,
                                ));
                            }
                        } else if occupied.borrowers == 0 {
                            occupied.borrowers = 1;
                            let conn = Arc::clone(&occupied.conn);
                            return Claim::Reuse(ConnectionLease::new(
                                Arc::clone(self),
                                conn,
                                index,
                                inner.generation,
                            ));
                        }
                    }
                }
            }

            let Some(index) = first_free else {
                return Claim::Saturated;
            };

            // The slot lock was released between the scan and here, so the
            // free slot may have been taken. Rescan if so.
            let mut inner = self.slots[index].lock();
            if !matches!(inner.state, SlotState::Empty) {
                continue;
            }
            inner.generation += 1;
            inner.state = SlotState::Reserved;
            return Claim::Reserved {
                slot: index,
                generation: inner.generation,
            };
        }
    }

    /// Return one borrow on a slot. Called from lease drops, so it must
    /// tolerate leases from vacated or re-occupied tenancies.
    pub(crate) fn release(&self, slot: usize, generation: u64) {
        let mut inner = self.slots[slot].lock();
        if inner.generation != generation {
            return;
        }
        let evict = match &mut inner.state {
            SlotState::Occupied(occupied) => {
                occupied.borrowers = occupied.borrowers.saturating_sub(1);
                if occupied.conn.is_open() {
                    if occupied.borrowers == 0 {
                        occupied.idle_since = Instant::now();
                    }
                    false
                } else {
                    occupied.conn.close();
                    true
                }
            }
            _ => return,
        };
        if evict {
            inner.state = SlotState::Empty;
            self.evicted_total.fetch_add(1, Ordering::Relaxed);
            metrics::pool_connection_closed(&self.uri, "dead");
        }
        drop(inner);
        self.slot_freed.notify_waiters();
    }

    fn abandon_reservation(&self, slot: usize) {
        {
            let mut inner = self.slots[slot].lock();
            if matches!(inner.state, SlotState::Reserved) {
                inner.state = SlotState::Empty;
            }
        }
        self.slot_freed.notify_waiters();
    }

    fn available(&self) -> Availability {
        if self.in_problem_window() {
            return Availability::Problem;
        }
        for slot in self.slots.iter() {
            let inner = slot.lock();
            let spare = match &inner.state {
                SlotState::Empty => true,
                SlotState::Reserved => false,
                SlotState::Occupied(occupied) => {
                    if !occupied.conn.is_open() {
                        true
                    } else if occupied.conn.is_multiplex() {
                        occupied.borrowers < self.settings.max_multiplex_borrowers
                    } else {
                        occupied.borrowers == 0
                    }
                }
            };
            if spare {
                return Availability::Available;
            }
        }
        if self.settings.max_queue_size > 0
            && self.waiting.load(Ordering::Relaxed) >= self.settings.max_queue_size
        {
            Availability::FullQueue
        } else {
            Availability::Full
        }
    }
}

/// Counts this borrower against the wait queue until dropped.
struct QueuedWaiter<'a, C: PooledConnection> {
    core: &'a PoolCore<C>,
}

impl<'a, C: PooledConnection> QueuedWaiter<'a, C> {
    fn register(core: &'a PoolCore<C>) -> Option<Self> {
        let mut current = core.waiting.load(Ordering::Relaxed);
        loop {
            if current >= core.settings.max_queue_size {
                return None;
            }
            match core.waiting.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Self { core }),
                Err(observed) => current = observed,
            }
        }
    }
}

impl<C: PooledConnection> Drop for QueuedWaiter<'_, C> {
    fn drop(&mut self) {
        self.core.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Vacates a reserved slot unless the reservation was filled.
struct SlotReservation<'a, C: PooledConnection> {
    core: &'a PoolCore<C>,
    slot: usize,
    armed: bool,
}

impl<C: PooledConnection> SlotReservation<'_, C> {
    fn filled(mut self) {
        self.armed = false;
    }
}

impl<C: PooledConnection> Drop for SlotReservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.core.abandon_reservation(self.slot);
        }
    }
}

/// Connection pool for one upstream URI.
pub struct ConnectionPool<M: ConnectionMaker> {
    core: Arc<PoolCore<M::Connection>>,
    maker: M,
}

impl<M: ConnectionMaker> ConnectionPool<M> {
    pub fn new(uri: impl Into<String>, maker: M, settings: PoolSettings) -> Self {
        let slot_count = settings.max_connections.max(1);
        let slots = (0..slot_count)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            core: Arc::new(PoolCore {
                uri: uri.into(),
                settings,
                slots,
                waiting: AtomicUsize::new(0),
                slot_freed: Notify::new(),
                last_connect_failure: Mutex::new(None),
                created_total: AtomicU64::new(0),
                expired_total: AtomicU64::new(0),
                evicted_total: AtomicU64::new(0),
            }),
            maker,
        }
    }

    pub fn uri(&self) -> &str {
        &self.core.uri
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.core.settings
    }

    /// Borrow a connection, dialing a new one if a slot is free.
    ///
    /// `timeout` bounds the whole call: queue wait plus, when a slot had to
    /// be filled, the dial and handshake (which is additionally capped by
    /// `connect_timeout`). `multiplex` is forwarded to the factory as a
    /// protocol preference; reuse decisions follow what the pooled
    /// connection itself reports via [`PooledConnection::is_multiplex`].
    pub async fn borrow(
        &self,
        timeout: Duration,
        multiplex: bool,
    ) -> Result<ConnectionLease<M::Connection>, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.core.try_claim() {
                Claim::Reuse(lease) => return Ok(lease),
                Claim::Reserved { slot, generation } => {
                    return self.fill_reservation(slot, generation, multiplex, deadline).await;
                }
                Claim::Saturated => {}
            }

            if self.core.settings.max_queue_size == 0 {
                metrics::pool_borrow_rejected(&self.core.uri, "at_capacity");
                return Err(PoolError::AtCapacity {
                    uri: self.core.uri.clone(),
                });
            }

            let Some(waiter) = QueuedWaiter::register(&self.core) else {
                metrics::pool_borrow_rejected(&self.core.uri, "queue_full");
                return Err(PoolError::QueueFull {
                    uri: self.core.uri.clone(),
                });
            };

            // Register for wakeups before the re-check so a release landing
            // between the two cannot strand this borrower.
            let freed = self.core.slot_freed.notified();

            match self.core.try_claim() {
                Claim::Reuse(lease) => return Ok(lease),
                Claim::Reserved { slot, generation } => {
                    drop(waiter);
                    return self.fill_reservation(slot, generation, multiplex, deadline).await;
                }
                Claim::Saturated => {}
            }

            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, freed).await.is_err() {
                metrics::pool_borrow_rejected(&self.core.uri, "timeout");
                return Err(PoolError::BorrowTimeout {
                    uri: self.core.uri.clone(),
                });
            }
            drop(waiter);
        }
    }

    /// Explicitly return a lease. Equivalent to dropping it.
    pub fn restore(&self, lease: ConnectionLease<M::Connection>) {
        drop(lease);
    }

    /// Non-blocking pressure summary. Never mutates pool state.
    pub fn available(&self) -> Availability {
        self.core.available()
    }

    /// Force-close every pooled connection and vacate its slot. Borrowers
    /// holding leases keep their (now closed) connections; their restores
    /// become no-ops. Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for slot in self.core.slots.iter() {
            let mut inner = slot.lock();
            if let SlotState::Occupied(occupied) = &inner.state {
                occupied.conn.close();
                inner.state = SlotState::Empty;
                closed += 1;
            }
        }
        if closed > 0 {
            self.core.slot_freed.notify_waiters();
            metrics::pool_force_closed(&self.core.uri, closed);
        }
        tracing::info!(upstream = %self.core.uri, closed, "force-closed pooled connections");
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let mut open = 0;
        let mut borrowed = 0;
        for slot in self.core.slots.iter() {
            let inner = slot.lock();
            if let SlotState::Occupied(occupied) = &inner.state {
                open += 1;
                borrowed += occupied.borrowers;
            }
        }
        PoolStats {
            open,
            borrowed,
            waiting: self.core.waiting.load(Ordering::Relaxed),
            created_total: self.core.created_total.load(Ordering::Relaxed),
            expired_total: self.core.expired_total.load(Ordering::Relaxed),
            evicted_total: self.core.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Record a failure observed outside the pool (for example a request
    /// that died mid-flight) so selection steers away from this upstream.
    pub(crate) fn note_connect_failure(&self) {
        self.core.note_connect_failure();
    }

    async fn fill_reservation(
        &self,
        slot: usize,
        generation: u64,
        multiplex: bool,
        deadline: Instant,
    ) -> Result<ConnectionLease<M::Connection>, PoolError> {
        let reservation = SlotReservation {
            core: &self.core,
            slot,
            armed: true,
        };
        let budget = deadline
            .duration_since(Instant::now())
            .min(self.core.settings.connect_timeout);

        match tokio::time::timeout(budget, self.maker.make(multiplex)).await {
            Ok(Ok(conn)) => {
                let conn = Arc::new(conn);
                {
                    let mut inner = self.core.slots[slot].lock();
                    inner.state = SlotState::Occupied(OccupiedSlot {
                        conn: Arc::clone(&conn),
                        borrowers: 1,
                        idle_since: Instant::now(),
                    });
                }
                reservation.filled();
                self.core.clear_connect_failure();
                self.core.created_total.fetch_add(1, Ordering::Relaxed);
                metrics::pool_connection_opened(&self.core.uri);
                tracing::debug!(
                    upstream = %self.core.uri,
                    slot,
                    multiplex = conn.is_multiplex(),
                    local = ?conn.local_addr(),
                    "opened upstream connection"
                );
                Ok(ConnectionLease::new(
                    Arc::clone(&self.core),
                    conn,
                    slot,
                    generation,
                ))
            }
            Ok(Err(source)) => {
                drop(reservation);
                self.core.note_connect_failure();
                metrics::pool_connect_failure(&self.core.uri);
                tracing::warn!(upstream = %self.core.uri, error = %source, "upstream connect failed");
                Err(PoolError::Connect {
                    uri: self.core.uri.clone(),
                    source,
                })
            }
            Err(_) => {
                drop(reservation);
                self.core.note_connect_failure();
                metrics::pool_connect_failure(&self.core.uri);
                tracing::warn!(
                    upstream = %self.core.uri,
                    budget_ms = budget.as_millis() as u64,
                    "upstream connect timed out"
                );
                Err(PoolError::ConnectTimeout {
                    uri: self.core.uri.clone(),
                })
            }
        }
    }
}
