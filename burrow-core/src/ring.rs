// ABOUTME: Fixed-size lossy ring buffer that smooths inbound event bursts
// ABOUTME: Producers overwrite slots unconditionally; one ticker drains a slot per tick

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Ring of swappable slots.
///
/// Under sustained overload the oldest undrained item in a slot is replaced
/// by the newest one. Each such overwrite is counted in [`EventRing::dropped`].
pub struct EventRing<T> {
    slots: Box<[Mutex<Option<T>>]>,
    head: AtomicUsize,
    dropped: AtomicU64,
}

impl<T> EventRing<T> {
    /// Capacity is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Mutex::new(None)).collect();
        Self {
            slots,
            head: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&self, item: T) {
        let index = self.head.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let previous = self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(item);
        if previous.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_event_dropped();
            tracing::trace!(slot = index, "ring slot overwritten before drain");
        }
    }

    /// Swaps the slot at `index` (mod capacity) empty.
    pub fn take(&self, index: usize) -> Option<T> {
        self.slots[index % self.slots.len()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Number of items overwritten before they were drained.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn drain(self: &Arc<Self>) -> RingDrain<T> {
        RingDrain {
            ring: Arc::clone(self),
            tail: 0,
        }
    }
}

/// The single consumer side of an [`EventRing`].
pub struct RingDrain<T> {
    ring: Arc<EventRing<T>>,
    tail: usize,
}

impl<T> RingDrain<T> {
    /// Takes whatever sits in the current tail slot and advances the tail,
    /// whether or not the slot held anything.
    pub fn tick(&mut self) -> Option<T> {
        let item = self.ring.take(self.tail);
        self.tail = self.tail.wrapping_add(1);
        item
    }

    /// Drains one slot every `interval` forever, passing items to `handle`.
    pub async fn run<F>(mut self, interval: Duration, mut handle: F)
    where
        F: FnMut(T),
    {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(
            capacity = self.ring.capacity(),
            interval_ms = interval.as_millis() as u64,
            "event ring drain started"
        );
        loop {
            ticker.tick().await;
            if let Some(item) = self.tick() {
                handle(item);
            }
        }
    }
}
