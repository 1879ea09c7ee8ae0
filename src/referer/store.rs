//! Time-indexed session store with background expiry.
//!
//! # Responsibilities
//! - Create session records with fresh, unpredictable ids
//! - Look records up by id, refreshing their last access
//! - Evict records unread for twice the sweep interval
//!
//! # Design Decisions
//! - Records are kept in creation order; the sweeper only inspects the head
//!   and stops at the first live record, so a sweep costs O(evicted)
//! - Lookups never reorder records. A long-lived head record therefore shields
//!   stale records created after it until it expires itself; lookups still
//!   report those stale records as absent
//! - The sweeper holds a weak reference and stops on `close()` or drop

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::referer::id::IdGenerator;
use crate::referer::session::{Session, SessionRecord};

/// Default sweep interval.
pub const DEFAULT_LATENCY: Duration = Duration::from_secs(60);

/// Longest accepted sweep interval; larger values are clamped.
pub const MAX_LATENCY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Capability to resolve a session by id.
pub trait Referer: Send + Sync {
    fn get(&self, id: &str) -> Option<Session>;
}

#[derive(Debug)]
struct Ledger {
    /// Records in creation order, oldest first.
    order: VecDeque<Arc<SessionRecord>>,
    index: HashMap<String, Arc<SessionRecord>>,
    ids: IdGenerator,
}

#[derive(Debug)]
pub(crate) struct Shared {
    latency: Duration,
    ledger: Mutex<Ledger>,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ttl(&self) -> Duration {
        self.latency.saturating_mul(2)
    }

    fn create(&self) -> Arc<SessionRecord> {
        let mut guard = self.ledger();
        let ledger = &mut *guard;

        let mut id = ledger.ids.next_id();
        while ledger.index.contains_key(&id) {
            id = ledger.ids.next_id();
        }

        let record = Arc::new(SessionRecord::new(id.clone(), Instant::now()));
        ledger.order.push_back(Arc::clone(&record));
        ledger.index.insert(id, Arc::clone(&record));
        metrics::record_referer_size(ledger.index.len());
        record
    }

    fn get(&self, id: &str) -> Option<Arc<SessionRecord>> {
        let ledger = self.ledger();
        let record = ledger.index.get(id)?;
        let now = Instant::now();
        if record.is_expired(now, self.ttl()) {
            return None;
        }
        record.touch(now);
        Some(Arc::clone(record))
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl();
        let mut guard = self.ledger();
        let ledger = &mut *guard;

        let mut evicted = 0;
        while let Some(head) = ledger.order.front() {
            if !head.is_expired(now, ttl) {
                break;
            }
            if let Some(head) = ledger.order.pop_front() {
                ledger.index.remove(head.id());
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, remaining = ledger.index.len(), "Referer sweep evicted sessions");
            metrics::record_referer_evictions(evicted);
            metrics::record_referer_size(ledger.index.len());
        }
        evicted
    }

    fn len(&self) -> usize {
        self.ledger().index.len()
    }
}

/// Weak, cloneable capability over a [`RefererStore`].
///
/// Lookups return `None` once the store has been dropped.
#[derive(Debug, Clone)]
pub struct RefererHandle {
    shared: Weak<Shared>,
}

impl Referer for RefererHandle {
    fn get(&self, id: &str) -> Option<Session> {
        let shared = self.shared.upgrade()?;
        let record = shared.get(id)?;
        Some(Session::new(record, self.clone()))
    }
}

/// Process-local session store shared by every request of one server.
///
/// Must be created inside a tokio runtime; the expiry sweeper is spawned on it.
#[derive(Debug)]
pub struct RefererStore {
    shared: Arc<Shared>,
    shutdown: Shutdown,
    sweeper: JoinHandle<()>,
}

impl RefererStore {
    /// Store sweeping every `latency`, ids seeded from the operating system.
    pub fn new(latency: Duration) -> Self {
        Self::with_generator(latency, IdGenerator::from_entropy())
    }

    /// Store with a fixed id seed.
    pub fn with_seed(latency: Duration, seed: u64) -> Self {
        Self::with_generator(latency, IdGenerator::with_seed(seed))
    }

    fn with_generator(latency: Duration, ids: IdGenerator) -> Self {
        let latency = if latency.is_zero() {
            DEFAULT_LATENCY
        } else if latency > MAX_LATENCY {
            tracing::warn!(
                requested_secs = latency.as_secs(),
                max_secs = MAX_LATENCY.as_secs(),
                "Referer latency clamped"
            );
            MAX_LATENCY
        } else {
            latency
        };
        let shared = Arc::new(Shared {
            latency,
            ledger: Mutex::new(Ledger {
                order: VecDeque::new(),
                index: HashMap::new(),
                ids,
            }),
        });
        let shutdown = Shutdown::new();
        let sweeper = spawn_sweeper(Arc::downgrade(&shared), latency, shutdown.subscribe());

        tracing::debug!(latency_secs = latency.as_secs_f64(), "Referer store created");

        Self {
            shared,
            shutdown,
            sweeper,
        }
    }

    /// Register a new, empty session at the tail of the store.
    pub fn create(&self) -> Session {
        let record = self.shared.create();
        Session::new(record, self.handle())
    }

    /// Evict expired records from the head now, without waiting for the next tick.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    pub fn handle(&self) -> RefererHandle {
        RefererHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn latency(&self) -> Duration {
        self.shared.latency
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweeper. Lookups and creation keep working.
    pub fn close(&self) {
        if self.shutdown.trigger() {
            tracing::debug!(sessions = self.len(), "Referer store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn is_sweeping(&self) -> bool {
        !self.sweeper.is_finished()
    }
}

impl Referer for RefererStore {
    fn get(&self, id: &str) -> Option<Session> {
        let record = self.shared.get(id)?;
        Some(Session::new(record, self.handle()))
    }
}

impl Drop for RefererStore {
    fn drop(&mut self) {
        self.close();
        self.sweeper.abort();
    }
}

fn spawn_sweeper(
    shared: Weak<Shared>,
    latency: Duration,
    mut stop: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + latency, latency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.sweep();
                }
                _ = stop.recv() => break,
            }
        }
        tracing::debug!("Referer sweeper stopped");
    })
}
