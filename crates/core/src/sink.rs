//! Consumer side of the receiver.
//!
//! The receiver hands every reassembled [`AccessUnit`] to an
//! [`AccessUnitSink`]. `Vec<AccessUnit>` and closures wrapped in [`FnSink`]
//! are sinks, which keeps single-threaded use simple. [`AccessUnitQueue`]
//! is the bounded, thread-safe hand-off used when a network thread
//! produces units and another thread decodes them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::media::access_unit::AccessUnit;

/// Default queue depth: one second of video at 30 fps.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// Receives access units as the receiver completes them.
pub trait AccessUnitSink {
    fn deliver(&mut self, access_unit: AccessUnit);

    /// Units the sink discarded instead of keeping.
    fn dropped(&self) -> u64 {
        0
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> AccessUnitSink for FnSink<F>
where
    F: FnMut(AccessUnit),
{
    fn deliver(&mut self, access_unit: AccessUnit) {
        (self.0)(access_unit)
    }
}

impl AccessUnitSink for Vec<AccessUnit> {
    fn deliver(&mut self, access_unit: AccessUnit) {
        self.push(access_unit);
    }
}

/// What a full [`AccessUnitQueue`] does with one more unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Keep the queued units and discard the incoming one.
    #[default]
    DropNewest,
    /// Evict the oldest queued unit to make room.
    DropOldest,
}

struct QueueInner {
    units: Mutex<VecDeque<AccessUnit>>,
    ready: Condvar,
    dropped: AtomicU64,
    capacity: usize,
    policy: Backpressure,
}

/// Bounded multi-producer/multi-consumer queue of access units.
///
/// Cloning yields another handle to the same queue. Pushing never blocks;
/// a full queue applies its [`Backpressure`] policy and counts the unit it
/// discarded.
#[derive(Clone)]
pub struct AccessUnitQueue {
    inner: Arc<QueueInner>,
}

impl AccessUnitQueue {
    /// A zero `capacity` is raised to 1.
    pub fn new(capacity: usize, policy: Backpressure) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                units: Mutex::new(VecDeque::with_capacity(capacity)),
                ready: Condvar::new(),
                dropped: AtomicU64::new(0),
                capacity,
                policy,
            }),
        }
    }

    pub fn push(&self, access_unit: AccessUnit) {
        let mut units = self.inner.units.lock();
        if units.len() >= self.inner.capacity {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            match self.inner.policy {
                Backpressure::DropNewest => {
                    tracing::debug!(
                        timestamp = access_unit.timestamp,
                        "access unit queue full, dropping newest"
                    );
                    return;
                }
                Backpressure::DropOldest => {
                    if let Some(evicted) = units.pop_front() {
                        tracing::debug!(
                            timestamp = evicted.timestamp,
                            "access unit queue full, dropping oldest"
                        );
                    }
                }
            }
        }
        units.push_back(access_unit);
        drop(units);
        self.inner.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<AccessUnit> {
        self.inner.units.lock().pop_front()
    }

    /// Wait up to `timeout` for a unit.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AccessUnit> {
        let deadline = Instant::now() + timeout;
        let mut units = self.inner.units.lock();
        while units.is_empty() {
            if self.inner.ready.wait_until(&mut units, deadline).timed_out() {
                break;
            }
        }
        units.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.units.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> Backpressure {
        self.inner.policy
    }

    /// Units discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AccessUnitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessUnitQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl AccessUnitSink for AccessUnitQueue {
    fn deliver(&mut self, access_unit: AccessUnit) {
        self.push(access_unit);
    }

    fn dropped(&self) -> u64 {
        AccessUnitQueue::dropped(self)
    }
}
