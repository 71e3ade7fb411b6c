//! Bounded pool of browser sessions.
//!
//! Every platform operation runs through one of a fixed number of slots.
//! A slot may hold a warm session (reused across leases), be vacant (the
//! next lease opens a session lazily), or be leased out.
//!
//! # Features
//!
//! - Priority queueing: delivery leases outrank scrapes, scrapes outrank
//!   discovery; ties are served in arrival order
//! - Reserved slot: with two or more slots, the last one turns away
//!   non-delivery leases while a delivery is waiting, so posting cannot
//!   be starved; without delivery demand it serves every class
//! - RAII handles: dropping a [`SlotHandle`] returns the slot; sessions
//!   stay warm unless the holder marks them for recycling
//! - Grace enforcement: leases held beyond the session grace period are
//!   forcibly reclaimed by [`BrowserPool::health_check`]
//! - Corruption escalation: a slot that keeps getting recycled without a
//!   working lease in between forces a full pool restart

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::OutpostConfig;
use crate::error::BridgeError;
use crate::limiter::OpClass;

use super::session::{BrowserSession, SessionBackend};

/// Errors that can occur when leasing from the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No slot became available within the wait budget.
    #[error("timed out after {0:?} waiting for a browser slot")]
    AcquireTimeout(Duration),

    /// The pool has been shut down.
    #[error("browser pool is shut down")]
    Closed,

    /// The session bridge failed while opening a session.
    #[error("session bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Configuration for the browser pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of slots in the pool.
    pub capacity: usize,
    /// Default wait budget for [`BrowserPool::acquire`].
    pub acquire_timeout: Duration,
    /// How long a lease may be held before it is forcibly reclaimed.
    pub session_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            acquire_timeout: Duration::from_secs(60),
            session_grace: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with the specified capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    /// Creates a configuration from application configuration.
    pub fn from_config(config: &OutpostConfig) -> Self {
        Self {
            capacity: config.pool_capacity,
            acquire_timeout: config.acquire_timeout,
            session_grace: config.session_grace,
        }
    }

    /// Sets the default acquire wait budget.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the lease grace period.
    pub fn with_session_grace(mut self, grace: Duration) -> Self {
        self.session_grace = grace;
        self
    }
}

/// Point-in-time slot accounting, used for metrics and pressure checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOccupancy {
    /// Total number of slots.
    pub capacity: usize,
    /// Slots currently leased out.
    pub busy: usize,
    /// Slots holding a warm session, ready to lease.
    pub idle: usize,
    /// Slots with no session.
    pub vacant: usize,
    /// Leases queued waiting for a slot.
    pub waiting: usize,
}

impl PoolOccupancy {
    /// Fraction of slots currently leased, in `0.0..=1.0`.
    pub fn busy_fraction(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.busy as f64 / self.capacity as f64
    }
}

/// Outcome of a [`BrowserPool::health_check`] sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolHealthReport {
    /// Leases reclaimed for exceeding the grace period.
    pub recycled_overdue: usize,
    /// Idle sessions pinged.
    pub pinged: usize,
    /// Idle sessions closed because the ping failed.
    pub closed_unhealthy: usize,
    /// The sweep found a slot recycling without recovering and rebuilt
    /// the whole pool.
    pub pool_restarted: bool,
}

enum SlotState {
    Vacant,
    Idle {
        session: BrowserSession,
    },
    Busy {
        session_id: Option<String>,
        class: OpClass,
        since: Instant,
    },
}

/// Consecutive health-check recycles of one slot before the whole pool is
/// torn down and rebuilt.
const MAX_SLOT_STRIKES: u32 = 3;

struct Slot {
    state: SlotState,
    /// Bumped whenever the slot is reclaimed out from under a lease, so a
    /// stale handle release is recognized and ignored.
    generation: u64,
    /// Consecutive health-check recycles without a healthy lease between
    /// them. Reaching [`MAX_SLOT_STRIKES`] marks the pool corrupted.
    strikes: u32,
}

struct Waiter {
    seq: u64,
    class: OpClass,
    tx: oneshot::Sender<SlotGrant>,
}

struct SlotGrant {
    slot: usize,
    generation: u64,
    /// Warm session carried over from an idle slot; `None` means the
    /// acquirer opens one lazily.
    session: Option<BrowserSession>,
}

struct ReleaseMsg {
    slot: usize,
    generation: u64,
    session: Option<BrowserSession>,
    recycle: bool,
}

struct PoolState {
    slots: Vec<Slot>,
    waiters: VecDeque<Waiter>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    backend: Arc<dyn SessionBackend>,
    config: PoolConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn reserved_index(&self) -> Option<usize> {
        if self.config.capacity >= 2 {
            Some(self.config.capacity - 1)
        } else {
            None
        }
    }
}

/// The reservation is scoped to outstanding demand: the reserved slot
/// turns away other classes only while a delivery lease is waiting.
fn eligible(reserved: Option<usize>, slot: usize, class: OpClass, delivery_waiting: bool) -> bool {
    match reserved {
        Some(r) if slot == r => class == OpClass::Delivery || !delivery_waiting,
        _ => true,
    }
}

fn has_delivery_waiter(state: &PoolState) -> bool {
    state.waiters.iter().any(|w| w.class == OpClass::Delivery)
}

fn find_slot(
    state: &PoolState,
    reserved: Option<usize>,
    class: OpClass,
    want_idle: bool,
) -> Option<usize> {
    let delivery_waiting = has_delivery_waiter(state);
    state.slots.iter().enumerate().find_map(|(idx, slot)| {
        let kind_matches = match slot.state {
            SlotState::Idle { .. } => want_idle,
            SlotState::Vacant => !want_idle,
            SlotState::Busy { .. } => false,
        };
        (kind_matches && eligible(reserved, idx, class, delivery_waiting)).then_some(idx)
    })
}

/// Marks the slot busy and builds the grant for it.
fn claim_slot(state: &mut PoolState, idx: usize, class: OpClass) -> Option<SlotGrant> {
    let slot = &mut state.slots[idx];
    let session = match std::mem::replace(&mut slot.state, SlotState::Vacant) {
        SlotState::Idle { session } => Some(session),
        SlotState::Vacant => None,
        busy @ SlotState::Busy { .. } => {
            slot.state = busy;
            return None;
        }
    };

    slot.state = SlotState::Busy {
        session_id: session.as_ref().map(|s| s.id.clone()),
        class,
        since: Instant::now(),
    };

    Some(SlotGrant {
        slot: idx,
        generation: slot.generation,
        session,
    })
}

/// Warm slots are preferred so sessions get reused before new ones open.
fn take_slot(state: &mut PoolState, reserved: Option<usize>, class: OpClass) -> Option<SlotGrant> {
    let idx = find_slot(state, reserved, class, true)
        .or_else(|| find_slot(state, reserved, class, false))?;
    claim_slot(state, idx, class)
}

/// Hands a freed slot to the best eligible waiter, if any.
fn grant_waiting(state: &mut PoolState, reserved: Option<usize>, idx: usize) {
    loop {
        if !matches!(
            state.slots[idx].state,
            SlotState::Idle { .. } | SlotState::Vacant
        ) {
            return;
        }

        let delivery_waiting = has_delivery_waiter(state);
        let best = state
            .waiters
            .iter()
            .enumerate()
            .filter(|(_, w)| eligible(reserved, idx, w.class, delivery_waiting))
            .min_by_key(|(_, w)| (w.class.priority(), w.seq))
            .map(|(pos, _)| pos);

        let Some(pos) = best else { return };
        let Some(waiter) = state.waiters.remove(pos) else {
            return;
        };
        let Some(grant) = claim_slot(state, idx, waiter.class) else {
            return;
        };

        match waiter.tx.send(grant) {
            Ok(()) => return,
            Err(grant) => {
                // Receiver gave up; put the slot back and try the next waiter.
                state.slots[idx].state = match grant.session {
                    Some(session) => SlotState::Idle { session },
                    None => SlotState::Vacant,
                };
            }
        }
    }
}

/// RAII lease over a single pool slot.
///
/// Dropping the handle returns the slot to the pool with the session kept
/// warm. Call [`SlotHandle::mark_recycle`] first to have the session torn
/// down instead, e.g. after an operation that may have wedged the browser.
#[derive(Debug)]
pub struct SlotHandle {
    session: BrowserSession,
    slot: usize,
    generation: u64,
    class: OpClass,
    recycle: bool,
    release_tx: mpsc::UnboundedSender<ReleaseMsg>,
}

impl SlotHandle {
    /// The session this lease holds.
    pub fn session(&self) -> &BrowserSession {
        &self.session
    }

    /// The operation class this slot was leased for.
    pub fn class(&self) -> OpClass {
        self.class
    }

    /// Tears the session down on release instead of returning it warm.
    pub fn mark_recycle(&mut self) {
        self.recycle = true;
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        // Dispatcher may already be gone during shutdown; nothing to do then.
        let _ = self.release_tx.send(ReleaseMsg {
            slot: self.slot,
            generation: self.generation,
            session: Some(self.session.clone()),
            recycle: self.recycle,
        });
    }
}

/// Fixed-capacity pool of browser session slots.
pub struct BrowserPool {
    shared: Arc<Shared>,
    release_tx: mpsc::UnboundedSender<ReleaseMsg>,
}

impl BrowserPool {
    /// Creates a pool and starts its release dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig, backend: Arc<dyn SessionBackend>) -> Self {
        let capacity = config.capacity;
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                slots: (0..capacity)
                    .map(|_| Slot {
                        state: SlotState::Vacant,
                        generation: 0,
                        strikes: 0,
                    })
                    .collect(),
                waiters: VecDeque::new(),
                next_seq: 0,
                closed: false,
            }),
            backend,
            config,
        });

        tokio::spawn(Self::run_dispatcher(Arc::clone(&shared), release_rx));
        info!(capacity = capacity, "Browser pool initialized");

        Self { shared, release_tx }
    }

    /// Leases a slot using the configured default wait budget.
    pub async fn acquire(&self, class: OpClass) -> Result<SlotHandle, PoolError> {
        self.acquire_with_timeout(class, self.shared.config.acquire_timeout)
            .await
    }

    /// Leases a slot, waiting at most `wait` for one to free up.
    ///
    /// A lease is granted immediately when an eligible slot is free and no
    /// queued lease of equal or higher priority would be jumped. Otherwise
    /// the caller queues; on grant of a vacant slot a fresh session is
    /// opened before the handle is returned.
    ///
    /// # Errors
    ///
    /// - `PoolError::AcquireTimeout` if no slot frees up in time
    /// - `PoolError::Closed` if the pool is shut down
    /// - `PoolError::Bridge` if opening a fresh session fails
    pub async fn acquire_with_timeout(
        &self,
        class: OpClass,
        wait: Duration,
    ) -> Result<SlotHandle, PoolError> {
        let reserved = self.shared.reserved_index();

        // Grant-or-enqueue is decided under the lock; the guard must be out
        // of scope before any await so the future stays `Send`.
        let queued = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let blocked = state
                .waiters
                .iter()
                .any(|w| w.class.priority() <= class.priority());
            let grant = if !blocked {
                take_slot(&mut state, reserved, class)
            } else {
                None
            };

            match grant {
                Some(grant) => Ok(grant),
                None => {
                    let (tx, rx) = oneshot::channel();
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.waiters.push_back(Waiter { seq, class, tx });
                    Err((seq, rx))
                }
            }
        };

        let (seq, mut rx) = match queued {
            Ok(grant) => return self.finish_acquire(grant, class).await,
            Err(waiting) => waiting,
        };

        match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(grant)) => self.finish_acquire(grant, class).await,
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                // Timed out. Leave the queue; if a grant raced in while we
                // were giving up, hand the slot straight back.
                let raced = {
                    let mut state = self.shared.lock();
                    match state.waiters.iter().position(|w| w.seq == seq) {
                        Some(pos) => {
                            state.waiters.remove(pos);
                            None
                        }
                        None => rx.try_recv().ok(),
                    }
                };
                if let Some(grant) = raced {
                    let _ = self.release_tx.send(ReleaseMsg {
                        slot: grant.slot,
                        generation: grant.generation,
                        session: grant.session,
                        recycle: false,
                    });
                }
                Err(PoolError::AcquireTimeout(wait))
            }
        }
    }

    async fn finish_acquire(
        &self,
        grant: SlotGrant,
        class: OpClass,
    ) -> Result<SlotHandle, PoolError> {
        let session = match grant.session {
            Some(session) => session,
            None => match self.shared.backend.create_session().await {
                Ok(session) => {
                    let mut state = self.shared.lock();
                    let slot = &mut state.slots[grant.slot];
                    if slot.generation == grant.generation {
                        if let SlotState::Busy { session_id, .. } = &mut slot.state {
                            *session_id = Some(session.id.clone());
                        }
                    }
                    session
                }
                Err(e) => {
                    // Give the slot back before surfacing the failure.
                    let _ = self.release_tx.send(ReleaseMsg {
                        slot: grant.slot,
                        generation: grant.generation,
                        session: None,
                        recycle: true,
                    });
                    return Err(PoolError::Bridge(e));
                }
            },
        };

        Ok(SlotHandle {
            session,
            slot: grant.slot,
            generation: grant.generation,
            class,
            recycle: false,
            release_tx: self.release_tx.clone(),
        })
    }

    /// Reclaims overdue leases and pings idle sessions.
    ///
    /// A lease held longer than the grace period is forcibly recycled: its
    /// slot generation is bumped so the stale handle's eventual release is
    /// ignored, and the session is closed. Idle sessions that fail their
    /// ping are closed so the next lease starts fresh.
    ///
    /// Each recycle puts a strike on its slot; a clean lease release or a
    /// healthy ping clears them. A slot that reaches [`MAX_SLOT_STRIKES`]
    /// means recycling is not producing working sessions, and the sweep
    /// escalates to [`BrowserPool::restart_all`].
    pub async fn health_check(&self) -> PoolHealthReport {
        let reserved = self.shared.reserved_index();
        let grace = self.shared.config.session_grace;

        // Reclaim leases past the grace period.
        let (overdue, freed) = {
            let mut state = self.shared.lock();
            let mut overdue = Vec::new();
            let mut freed = Vec::new();
            let now = Instant::now();

            for (idx, slot) in state.slots.iter_mut().enumerate() {
                if let SlotState::Busy {
                    session_id, since, ..
                } = &slot.state
                {
                    if now.duration_since(*since) > grace {
                        let sid = session_id.clone();
                        slot.generation += 1;
                        slot.state = SlotState::Vacant;
                        slot.strikes += 1;
                        if let Some(id) = sid {
                            overdue.push(id);
                        }
                        freed.push(idx);
                    }
                }
            }
            (overdue, freed)
        };

        for id in &overdue {
            warn!(session_id = %id, "Forcibly recycling overdue browser session");
            self.close_best_effort(id).await;
        }
        if !freed.is_empty() {
            let mut state = self.shared.lock();
            for idx in freed {
                grant_waiting(&mut state, reserved, idx);
            }
        }

        // Lease out idle slots internally and ping them.
        let grabbed: Vec<SlotHandle> = {
            let mut state = self.shared.lock();
            let mut handles = Vec::new();
            for idx in 0..state.slots.len() {
                if matches!(state.slots[idx].state, SlotState::Idle { .. }) {
                    if let Some(grant) = claim_slot(&mut state, idx, OpClass::Delivery) {
                        if let Some(session) = grant.session {
                            handles.push(SlotHandle {
                                session,
                                slot: grant.slot,
                                generation: grant.generation,
                                class: OpClass::Delivery,
                                recycle: false,
                                release_tx: self.release_tx.clone(),
                            });
                        }
                    }
                }
            }
            handles
        };

        let mut report = PoolHealthReport {
            recycled_overdue: overdue.len(),
            ..Default::default()
        };

        let mut pinged = Vec::with_capacity(grabbed.len());
        for mut handle in grabbed {
            report.pinged += 1;
            let healthy = matches!(
                self.shared.backend.ping_session(&handle.session.id).await,
                Ok(true)
            );
            if !healthy {
                info!(session_id = %handle.session.id, "Closing unhealthy idle session");
                handle.mark_recycle();
                report.closed_unhealthy += 1;
            }
            pinged.push((handle.slot, healthy));
            drop(handle);
        }

        let corrupted = {
            let mut state = self.shared.lock();
            for (idx, healthy) in pinged {
                let slot = &mut state.slots[idx];
                if healthy {
                    slot.strikes = 0;
                } else {
                    slot.strikes += 1;
                }
            }
            state.slots.iter().any(|s| s.strikes >= MAX_SLOT_STRIKES)
        };

        if corrupted {
            warn!("Slot recycling is not recovering sessions; restarting the pool");
            {
                let mut state = self.shared.lock();
                for slot in state.slots.iter_mut() {
                    slot.strikes = 0;
                }
            }
            self.restart_all().await;
            report.pool_restarted = true;
        }

        report
    }

    /// Closes every session and vacates every slot.
    ///
    /// Queued leases stay queued and are granted cold slots afterwards.
    /// Outstanding handles become stale; their release is ignored apart
    /// from closing the session they still reference.
    ///
    /// Returns the number of sessions closed.
    pub async fn restart_all(&self) -> usize {
        let reserved = self.shared.reserved_index();
        let sessions: Vec<String> = {
            let mut state = self.shared.lock();
            let mut ids = Vec::new();
            for slot in state.slots.iter_mut() {
                slot.generation += 1;
                match std::mem::replace(&mut slot.state, SlotState::Vacant) {
                    SlotState::Idle { session } => ids.push(session.id),
                    SlotState::Busy {
                        session_id: Some(id),
                        ..
                    } => ids.push(id),
                    _ => {}
                }
            }
            ids
        };

        warn!(closing = sessions.len(), "Restarting browser pool");
        for id in &sessions {
            self.close_best_effort(id).await;
        }

        {
            let mut state = self.shared.lock();
            for idx in 0..state.slots.len() {
                grant_waiting(&mut state, reserved, idx);
            }
        }

        sessions.len()
    }

    /// Shuts the pool down.
    ///
    /// Pending leases fail with `PoolError::Closed` and idle sessions are
    /// closed. Sessions still leased out are closed when their handles
    /// release.
    pub async fn shutdown(&self) {
        let (waiters, idle_sessions) = {
            let mut state = self.shared.lock();
            state.closed = true;
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();

            let mut ids = Vec::new();
            for slot in state.slots.iter_mut() {
                slot.generation += 1;
                if let SlotState::Idle { session } =
                    std::mem::replace(&mut slot.state, SlotState::Vacant)
                {
                    ids.push(session.id);
                }
            }
            (waiters, ids)
        };

        // Dropping the senders wakes queued acquires with `Closed`.
        drop(waiters);

        for id in &idle_sessions {
            self.close_best_effort(id).await;
        }

        info!(closed = idle_sessions.len(), "Browser pool shut down");
    }

    /// Current slot accounting.
    pub fn occupancy(&self) -> PoolOccupancy {
        let state = self.shared.lock();
        let mut occupancy = PoolOccupancy {
            capacity: state.slots.len(),
            waiting: state.waiters.len(),
            ..Default::default()
        };

        for slot in &state.slots {
            match slot.state {
                SlotState::Busy { .. } => occupancy.busy += 1,
                SlotState::Idle { .. } => occupancy.idle += 1,
                SlotState::Vacant => occupancy.vacant += 1,
            }
        }
        occupancy
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    async fn close_best_effort(&self, id: &str) {
        match self.shared.backend.close_session(id).await {
            Ok(()) | Err(BridgeError::SessionNotFound(_)) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Failed to close browser session"),
        }
    }

    async fn run_dispatcher(shared: Arc<Shared>, mut release_rx: mpsc::UnboundedReceiver<ReleaseMsg>) {
        let reserved = shared.reserved_index();

        while let Some(msg) = release_rx.recv().await {
            let ReleaseMsg {
                slot: idx,
                generation,
                session,
                recycle,
            } = msg;

            let to_close = {
                let mut state = shared.lock();
                if state.slots[idx].generation != generation {
                    // Stale release from a reclaimed lease; the slot has
                    // moved on, only the session still needs closing.
                    session.map(|s| s.id)
                } else if recycle {
                    let slot = &mut state.slots[idx];
                    slot.generation += 1;
                    slot.state = SlotState::Vacant;
                    let id = session.map(|s| s.id);
                    grant_waiting(&mut state, reserved, idx);
                    id
                } else {
                    let slot = &mut state.slots[idx];
                    slot.state = match session {
                        Some(session) => SlotState::Idle { session },
                        None => SlotState::Vacant,
                    };
                    // A lease served and released cleanly; the slot works.
                    slot.strikes = 0;
                    grant_waiting(&mut state, reserved, idx);
                    None
                }
            };

            if let Some(id) = to_close {
                match shared.backend.close_session(&id).await {
                    Ok(()) | Err(BridgeError::SessionNotFound(_)) => {}
                    Err(e) => {
                        warn!(session_id = %id, error = %e, "Failed to close browser session")
                    }
                }
            }
        }

        debug!("Browser pool dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeBackend {
        counter: AtomicU32,
        open: Mutex<HashSet<String>>,
        closed: Mutex<Vec<String>>,
        fail_create: AtomicBool,
        unhealthy: Mutex<HashSet<String>>,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                counter: AtomicU32::new(0),
                open: Mutex::new(HashSet::new()),
                closed: Mutex::new(Vec::new()),
                fail_create: AtomicBool::new(false),
                unhealthy: Mutex::new(HashSet::new()),
            })
        }

        fn created(&self) -> u32 {
            self.counter.load(Ordering::SeqCst)
        }

        fn closed_ids(&self) -> Vec<String> {
            self.closed.lock().unwrap().clone()
        }

        fn set_fail_create(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        fn mark_unhealthy(&self, id: &str) {
            self.unhealthy.lock().unwrap().insert(id.to_string());
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_session(&self) -> Result<BrowserSession, BridgeError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(BridgeError::Protocol("bridge offline".to_string()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("sess-{n}");
            self.open.lock().unwrap().insert(id.clone());
            Ok(BrowserSession::new(id))
        }

        async fn close_session(&self, id: &str) -> Result<(), BridgeError> {
            self.open.lock().unwrap().remove(id);
            self.closed.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn ping_session(&self, id: &str) -> Result<bool, BridgeError> {
            let open = self.open.lock().unwrap().contains(id);
            let sick = self.unhealthy.lock().unwrap().contains(id);
            Ok(open && !sick)
        }
    }

    fn settle() -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(50))
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.session_grace, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_acquire_creates_then_reuses_session() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(1), backend.clone());

        let handle = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_eq!(backend.created(), 1);
        let first_id = handle.session().id.clone();
        drop(handle);

        let handle = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_eq!(handle.session().id, first_id);
        assert_eq!(backend.created(), 1, "warm session should be reused");
    }

    #[tokio::test]
    async fn test_reserved_slot_follows_delivery_demand() {
        let backend = FakeBackend::new();
        let config = PoolConfig::new(2).with_acquire_timeout(Duration::from_millis(100));
        let pool = Arc::new(BrowserPool::new(config, backend));

        // With no delivery demand outstanding, scrapes may fill the whole
        // pool, reserved slot included.
        let first = pool.acquire(OpClass::Scrape).await.unwrap();
        let second = pool.acquire(OpClass::Scrape).await.unwrap();

        // A delivery lease queues against the saturated pool.
        let delivery_pool = Arc::clone(&pool);
        let delivery = tokio::spawn(async move {
            delivery_pool
                .acquire_with_timeout(OpClass::Delivery, Duration::from_secs(5))
                .await
        });
        settle().await;

        // While the delivery waits, no scrape gets in ahead of it.
        let denied = pool.acquire(OpClass::Scrape).await;
        assert!(matches!(denied, Err(PoolError::AcquireTimeout(_))));

        // The first freed slot goes to the delivery.
        drop(first);
        let granted = delivery.await.unwrap().unwrap();
        assert_eq!(granted.class(), OpClass::Delivery);
        drop((second, granted));
    }

    #[tokio::test]
    async fn test_delivery_outranks_earlier_scrape_waiter() {
        let backend = FakeBackend::new();
        let pool = Arc::new(BrowserPool::new(PoolConfig::new(1), backend));
        let order = Arc::new(Mutex::new(Vec::new()));

        let held = pool.acquire(OpClass::Discovery).await.unwrap();

        let scrape_pool = Arc::clone(&pool);
        let scrape_order = Arc::clone(&order);
        let scrape = tokio::spawn(async move {
            let handle = scrape_pool.acquire(OpClass::Scrape).await.unwrap();
            scrape_order.lock().unwrap().push("scrape");
            drop(handle);
        });
        settle().await;

        let delivery_pool = Arc::clone(&pool);
        let delivery_order = Arc::clone(&order);
        let delivery = tokio::spawn(async move {
            let handle = delivery_pool.acquire(OpClass::Delivery).await.unwrap();
            delivery_order.lock().unwrap().push("delivery");
            drop(handle);
        });
        settle().await;

        drop(held);
        delivery.await.unwrap();
        scrape.await.unwrap();

        let order = order.lock().unwrap().clone();
        assert_eq!(order, vec!["delivery", "scrape"]);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(1), backend);

        let _held = pool.acquire(OpClass::Delivery).await.unwrap();
        let result = pool
            .acquire_with_timeout(OpClass::Delivery, Duration::from_millis(50))
            .await;

        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
        // The abandoned waiter must not linger in the queue.
        assert_eq!(pool.occupancy().waiting, 0);
    }

    #[tokio::test]
    async fn test_recycle_closes_session() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(1), backend.clone());

        let mut handle = pool.acquire(OpClass::Delivery).await.unwrap();
        let first_id = handle.session().id.clone();
        handle.mark_recycle();
        drop(handle);

        let handle = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_ne!(handle.session().id, first_id);
        assert_eq!(backend.created(), 2);

        settle().await;
        assert!(backend.closed_ids().contains(&first_id));
    }

    #[tokio::test]
    async fn test_create_failure_frees_slot() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(1), backend.clone());

        backend.set_fail_create(true);
        let result = pool.acquire(OpClass::Delivery).await;
        assert!(matches!(result, Err(PoolError::Bridge(_))));

        backend.set_fail_create(false);
        let handle = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_eq!(handle.session().id, "sess-1");
    }

    #[tokio::test]
    async fn test_health_check_reclaims_overdue_lease() {
        let backend = FakeBackend::new();
        let config = PoolConfig::new(1).with_session_grace(Duration::ZERO);
        let pool = BrowserPool::new(config, backend.clone());

        let stale = pool.acquire(OpClass::Delivery).await.unwrap();
        let stale_id = stale.session().id.clone();
        settle().await;

        let report = pool.health_check().await;
        assert_eq!(report.recycled_overdue, 1);
        assert!(backend.closed_ids().contains(&stale_id));
        assert_eq!(pool.occupancy().busy, 0);

        // A fresh lease works while the stale handle is still alive.
        let fresh = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_ne!(fresh.session().id, stale_id);

        // The stale release must not disturb the new lease.
        drop(stale);
        settle().await;
        assert_eq!(pool.occupancy().busy, 1);
    }

    #[tokio::test]
    async fn test_health_check_closes_unhealthy_idle() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(1), backend.clone());

        let handle = pool.acquire(OpClass::Scrape).await.unwrap();
        let id = handle.session().id.clone();
        drop(handle);
        settle().await;

        backend.mark_unhealthy(&id);
        let report = pool.health_check().await;
        assert_eq!(report.pinged, 1);
        assert_eq!(report.closed_unhealthy, 1);

        settle().await;
        assert!(backend.closed_ids().contains(&id));
        assert_eq!(pool.occupancy().vacant, 1);
    }

    #[tokio::test]
    async fn test_wedged_slot_escalates_to_pool_restart() {
        let backend = FakeBackend::new();
        let config = PoolConfig::new(2).with_session_grace(Duration::ZERO);
        let pool = BrowserPool::new(config, backend.clone());

        // A lease that never releases looks wedged on every sweep. Two
        // reclaims put two strikes on the slot without escalating.
        let mut wedged = Vec::new();
        for sweep in 0..2 {
            wedged.push(pool.acquire(OpClass::Delivery).await.unwrap());
            settle().await;
            let report = pool.health_check().await;
            assert_eq!(report.recycled_overdue, 1, "sweep {sweep}");
            assert!(!report.pool_restarted, "sweep {sweep}");
        }

        // The third reclaim of the same slot crosses the strike limit.
        wedged.push(pool.acquire(OpClass::Delivery).await.unwrap());
        settle().await;
        let report = pool.health_check().await;
        assert_eq!(report.recycled_overdue, 1);
        assert!(report.pool_restarted);
        assert_eq!(pool.occupancy().vacant, 2);

        // The rebuilt pool opens fresh sessions.
        let fresh = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_eq!(fresh.session().id, "sess-4");
    }

    #[tokio::test]
    async fn test_clean_release_clears_slot_strikes() {
        let backend = FakeBackend::new();
        let config = PoolConfig::new(2).with_session_grace(Duration::ZERO);
        let pool = BrowserPool::new(config, backend.clone());

        // Two wedged leases, two strikes.
        let w1 = pool.acquire(OpClass::Delivery).await.unwrap();
        settle().await;
        pool.health_check().await;
        let w2 = pool.acquire(OpClass::Delivery).await.unwrap();
        settle().await;
        pool.health_check().await;

        // A lease that releases cleanly proves the slot recovered.
        drop(pool.acquire(OpClass::Delivery).await.unwrap());
        settle().await;

        // The next reclaim starts a fresh count instead of escalating.
        let w3 = pool.acquire(OpClass::Delivery).await.unwrap();
        settle().await;
        let report = pool.health_check().await;
        assert_eq!(report.recycled_overdue, 1);
        assert!(!report.pool_restarted);

        drop((w1, w2, w3));
    }

    #[tokio::test]
    async fn test_restart_all_closes_everything() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(2), backend.clone());

        let h1 = pool.acquire(OpClass::Delivery).await.unwrap();
        let h2 = pool.acquire(OpClass::Delivery).await.unwrap();

        let closed = pool.restart_all().await;
        assert_eq!(closed, 2);
        assert_eq!(pool.occupancy().vacant, 2);

        drop(h1);
        drop(h2);
        settle().await;
        assert_eq!(pool.occupancy().vacant, 2);

        let fresh = pool.acquire(OpClass::Delivery).await.unwrap();
        assert_eq!(fresh.session().id, "sess-3");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_drains() {
        let backend = FakeBackend::new();
        let pool = Arc::new(BrowserPool::new(PoolConfig::new(1), backend));

        let held = pool.acquire(OpClass::Delivery).await.unwrap();

        let waiter_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiter_pool.acquire(OpClass::Delivery).await });
        settle().await;

        pool.shutdown().await;

        let queued = waiter.await.unwrap();
        assert!(matches!(queued, Err(PoolError::Closed)));
        assert!(matches!(
            pool.acquire(OpClass::Delivery).await,
            Err(PoolError::Closed)
        ));

        drop(held);
    }

    #[tokio::test]
    async fn test_occupancy_counts() {
        let backend = FakeBackend::new();
        let pool = BrowserPool::new(PoolConfig::new(3), backend);

        let _h1 = pool.acquire(OpClass::Delivery).await.unwrap();
        let _h2 = pool.acquire(OpClass::Delivery).await.unwrap();

        let occupancy = pool.occupancy();
        assert_eq!(occupancy.capacity, 3);
        assert_eq!(occupancy.busy, 2);
        assert_eq!(occupancy.vacant, 1);
        assert_eq!(occupancy.idle, 0);
        assert!((occupancy.busy_fraction() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
