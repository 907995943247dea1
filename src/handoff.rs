//! Lock-free hand-off between the capture thread and the decoder thread.
//!
//! A bounded single-producer/single-consumer ring of pre-sized I/Q block
//! slots. The producer claims the next free slot, fills it in place and
//! publishes with a release store; the consumer acquires the matching slot,
//! borrows its contents for the duration of a closure, then releases it.
//!
//! The capture side never blocks: when the ring is full the block is dropped
//! and counted, so a slow consumer costs a brief glitch instead of stalling
//! the tuner. The consumer may block on a condition variable that the
//! producer signals after each publish.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex;
//!
//! let (mut tx, mut rx) = heterodyne::handoff::block_ring(4, 8);
//! tx.publish_with(|slot| slot.fill(Complex::new(0.5, 0.0)));
//! tx.finish();
//! let sum = rx.recv_with(|block| block.iter().map(|s| s.re).sum::<f32>());
//! assert_eq!(sum, Some(4.0));
//! assert!(rx.recv_with(|_| ()).is_none());
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use num_complex::Complex;

use crate::IQSample;

struct Shared {
    slots: Box<[UnsafeCell<Vec<IQSample>>]>,
    /// Sequence number of the next slot to write.
    head: AtomicUsize,
    /// Sequence number of the next slot to read.
    tail: AtomicUsize,
    end: AtomicBool,
    dropped: AtomicU64,
    gate: Mutex<()>,
    ready: Condvar,
}

// Safety: a slot is touched by the producer only between claim and the
// release store of `head`, and by the consumer only between the acquire load
// of `head` and the release store of `tail`; the cursors keep those regions
// disjoint, and there is exactly one producer and one consumer.
unsafe impl Sync for Shared {}

/// Producer half of the ring. Owned by the capture thread.
pub struct BlockWriter {
    shared: Arc<Shared>,
}

/// Consumer half of the ring. Owned by the decoder thread.
pub struct BlockReader {
    shared: Arc<Shared>,
}

/// Create a ring of `capacity` slots, each pre-sized to `block_len` samples.
pub fn block_ring(capacity: usize, block_len: usize) -> (BlockWriter, BlockReader) {
    assert!(capacity > 0, "ring capacity must be greater than 0");
    assert!(block_len > 0, "block length must be greater than 0");

    let slots: Vec<UnsafeCell<Vec<IQSample>>> = (0..capacity)
        .map(|_| UnsafeCell::new(vec![Complex::new(0.0, 0.0); block_len]))
        .collect();

    let shared = Arc::new(Shared {
        slots: slots.into_boxed_slice(),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        end: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
        gate: Mutex::new(()),
        ready: Condvar::new(),
    });

    (
        BlockWriter {
            shared: Arc::clone(&shared),
        },
        BlockReader { shared },
    )
}

impl BlockWriter {
    /// Claim the next free slot, fill it in place and publish it.
    ///
    /// Returns `false` without calling `fill` when the ring is full; the
    /// drop is counted and the producer carries on with the next block.
    pub fn publish_with<F>(&mut self, fill: F) -> bool
    where
        F: FnOnce(&mut [IQSample]),
    {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == self.shared.slots.len() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let idx = head % self.shared.slots.len();
        // Safety: see `Shared`; this slot is invisible to the consumer until
        // the release store below.
        let slot = unsafe { &mut *self.shared.slots[idx].get() };
        fill(slot.as_mut_slice());
        self.shared.head.store(head.wrapping_add(1), Ordering::Release);

        let _gate = self.shared.gate.lock().unwrap();
        self.shared.ready.notify_one();
        true
    }

    /// Mark the end of the stream and wake the consumer.
    pub fn finish(&self) {
        self.shared.end.store(true, Ordering::Release);
        let _gate = self.shared.gate.lock().unwrap();
        self.shared.ready.notify_all();
    }

    /// Number of blocks dropped because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl BlockReader {
    /// Borrow the next published block for the duration of `consume`.
    ///
    /// Blocks while the ring is empty. Returns `None` once the stream has
    /// ended and every published block has been consumed.
    pub fn recv_with<F, R>(&mut self, consume: F) -> Option<R>
    where
        F: FnOnce(&[IQSample]) -> R,
    {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        loop {
            if self.shared.head.load(Ordering::Acquire) != tail {
                break;
            }
            if self.shared.end.load(Ordering::Acquire) {
                // One more look: the last block may have been published just
                // before the end marker.
                if self.shared.head.load(Ordering::Acquire) == tail {
                    return None;
                }
                break;
            }
            let gate = self.shared.gate.lock().unwrap();
            if self.shared.head.load(Ordering::Acquire) == tail
                && !self.shared.end.load(Ordering::Acquire)
            {
                drop(self.shared.ready.wait(gate).unwrap());
            }
        }

        let idx = tail % self.shared.slots.len();
        // Safety: see `Shared`; the producer will not reuse this slot until
        // the release store of `tail` below.
        let slot = unsafe { &*self.shared.slots[idx].get() };
        let result = consume(slot.as_slice());
        self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(result)
    }

    /// Number of published blocks waiting to be consumed.
    pub fn backlog(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    /// Blocks dropped so far on the producer side.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = block_ring(4, 2);
        for v in 0..3 {
            assert!(tx.publish_with(|slot| slot.fill(Complex::new(v as f32, 0.0))));
        }
        for v in 0..3 {
            let got = rx.recv_with(|block| block[0].re).unwrap();
            assert_eq!(got, v as f32);
        }
    }

    #[test]
    fn test_slots_are_fixed_size() {
        let (mut tx, mut rx) = block_ring(2, 16);
        tx.publish_with(|slot| {
            assert_eq!(slot.len(), 16);
            slot[15] = Complex::new(1.0, -1.0);
        });
        let len = rx.recv_with(|block| block.len()).unwrap();
        assert_eq!(len, 16);
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let (mut tx, mut rx) = block_ring(2, 4);
        assert!(tx.publish_with(|_| {}));
        assert!(tx.publish_with(|_| {}));
        // Consumer asleep: further publishes drop.
        assert!(!tx.publish_with(|_| panic!("fill must not run on a full ring")));
        assert!(!tx.publish_with(|_| panic!("fill must not run on a full ring")));
        assert_eq!(tx.dropped(), 2);

        // Consuming one slot frees one publish.
        rx.recv_with(|_| ()).unwrap();
        assert!(tx.publish_with(|_| {}));
        assert_eq!(tx.dropped(), 2);
    }

    #[test]
    fn test_end_marker_after_drain() {
        let (mut tx, mut rx) = block_ring(2, 1);
        tx.publish_with(|slot| slot[0] = Complex::new(7.0, 0.0));
        tx.finish();
        assert_eq!(rx.recv_with(|block| block[0].re), Some(7.0));
        assert_eq!(rx.recv_with(|block| block[0].re), None);
    }

    #[test]
    fn test_cross_thread_order_and_wakeup() {
        let (mut tx, mut rx) = block_ring(8, 4);
        let producer = thread::spawn(move || {
            for v in 0..100u32 {
                while !tx.publish_with(|slot| slot.fill(Complex::new(v as f32, 0.0))) {
                    thread::sleep(Duration::from_micros(50));
                }
            }
            tx.finish();
            tx.dropped()
        });

        let mut seen = Vec::new();
        while let Some(v) = rx.recv_with(|block| block[0].re) {
            seen.push(v as u32);
        }
        let dropped = producer.join().unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_backlog_reporting() {
        let (mut tx, mut rx) = block_ring(4, 1);
        assert_eq!(rx.backlog(), 0);
        tx.publish_with(|_| {});
        tx.publish_with(|_| {});
        assert_eq!(rx.backlog(), 2);
        rx.recv_with(|_| ()).unwrap();
        assert_eq!(rx.backlog(), 1);
    }
}
