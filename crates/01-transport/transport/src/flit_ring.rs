//! Bounded single-producer/single-consumer flit ring.
//!
//! The ring is split into a [`FlitProducer`] and a [`FlitConsumer`] at
//! construction. Neither half is `Clone`, so exactly one thread pushes and one
//! thread pops. Both operations are non-blocking and lock-free: the producer
//! owns `head`, the consumer owns `tail`, and each publishes its index with a
//! release store that the other side reads with an acquire load.
//!
//! A push into a full ring reports [`FlitPush::WouldBlock`] and leaves the ring
//! untouched; the caller keeps the flit and decides whether to retry or park it.

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
#[cfg(feature = "loom")]
use loom::sync::Arc;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::Arc;

use crate::{Flit, TransportError, TransportResult};

/// Smallest capacity accepted by [`flit_ring`].
pub const MIN_RING_CAPACITY: usize = 2;
/// Largest capacity accepted by [`flit_ring`].
pub const MAX_RING_CAPACITY: usize = 1 << 24;

/// Outcome of pushing a flit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlitPush {
    /// The flit was enqueued.
    Ok,
    /// The ring is full; the flit was not enqueued.
    WouldBlock,
}

struct Slot {
    value: AtomicU64,
    meta: AtomicU16,
}

struct FlitRing {
    slots: Box<[Slot]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl FlitRing {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

/// Creates a ring holding at least `capacity` flits and returns its two halves.
///
/// The capacity is rounded up to the next power of two.
pub fn flit_ring(capacity: usize) -> TransportResult<(FlitProducer, FlitConsumer)> {
    if !(MIN_RING_CAPACITY..=MAX_RING_CAPACITY).contains(&capacity) {
        return Err(TransportError::InvalidCapacity {
            requested: capacity,
            minimum: MIN_RING_CAPACITY,
            maximum: MAX_RING_CAPACITY,
        });
    }
    let capacity = capacity.next_power_of_two();
    let slots = (0..capacity)
        .map(|_| Slot {
            value: AtomicU64::new(0),
            meta: AtomicU16::new(0),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(FlitRing {
        slots,
        mask: capacity - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    Ok((
        FlitProducer {
            ring: Arc::clone(&ring),
        },
        FlitConsumer { ring },
    ))
}

/// Pushing half of a flit ring.
pub struct FlitProducer {
    ring: Arc<FlitRing>,
}

impl FlitProducer {
    /// Enqueues `flit` unless the ring is full.
    pub fn push(&mut self, flit: Flit) -> FlitPush {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) > ring.mask {
            return FlitPush::WouldBlock;
        }
        let slot = &ring.slots[head & ring.mask];
        slot.value.store(flit.value, Ordering::Relaxed);
        slot.meta.store(flit.meta(), Ordering::Relaxed);
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        FlitPush::Ok
    }

    /// Free slots as seen by the producer.
    pub fn free(&self) -> usize {
        self.capacity() - self.ring.len()
    }

    /// Flits currently queued.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}

/// Popping half of a flit ring.
pub struct FlitConsumer {
    ring: Arc<FlitRing>,
}

impl FlitConsumer {
    /// Dequeues the oldest flit, or returns `None` immediately when empty.
    pub fn pop(&mut self) -> Option<Flit> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &ring.slots[tail & ring.mask];
        let flit = Flit::from_parts(
            slot.value.load(Ordering::Relaxed),
            slot.meta.load(Ordering::Relaxed),
        );
        ring.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(flit)
    }

    /// Flits currently queued.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}
