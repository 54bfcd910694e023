//! Lock-free single-producer single-consumer byte ring.
//!
//! Two of these form the only shared memory between the control core and the
//! USB core. The producer owns `head`, the consumer owns `tail`; each side
//! publishes its index with a release store and observes the other side's
//! with an acquire load, so payload bytes are visible before the index that
//! covers them. No locks, no critical sections.
//!
//! One slot is kept empty to distinguish full from empty, so a ring of
//! capacity `N` holds at most `N - 1` bytes.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Shared ring storage. Allocate as a `static`, then `split` once into the
/// producer and consumer halves, one per core.
pub struct Ring<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    /// Next write position. Stored by the producer only.
    head: AtomicUsize,
    /// Next read position. Stored by the consumer only.
    tail: AtomicUsize,
    /// Bytes dropped because the ring was full, summed over all writes.
    overflow: AtomicU32,
    split_taken: AtomicBool,
}

// The buffer cell is only touched through the split halves: the producer
// writes slots in [tail, head) exclusion, the consumer reads slots the
// producer has already published. The index protocol makes that sound.
unsafe impl<const N: usize> Sync for Ring<N> {}

impl<const N: usize> Ring<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflow: AtomicU32::new(0),
            split_taken: AtomicBool::new(false),
        }
    }

    /// Hands out the two halves. Returns `None` on any call after the first,
    /// which is what makes the single-producer/single-consumer claim hold.
    pub fn split(&self) -> Option<(Producer<'_, N>, Consumer<'_, N>)> {
        if self.split_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((Producer { ring: self }, Consumer { ring: self }))
    }

    /// Bytes currently buffered. Racy by nature; exact on the calling side's
    /// own half.
    pub fn used_space(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    pub fn free_space(&self) -> usize {
        N - 1 - self.used_space()
    }

    pub fn is_empty(&self) -> bool {
        self.used_space() == 0
    }

    /// Total bytes dropped at the producer side since boot.
    pub fn overflow_count(&self) -> u32 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for Ring<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write half. Lives on exactly one core.
pub struct Producer<'a, const N: usize> {
    ring: &'a Ring<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    /// Copies as much of `data` as fits and publishes it. Returns the number
    /// of bytes written; the surplus is dropped and added to the overflow
    /// counter.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        // Acquire pairs with the consumer's release of `tail`: slots at and
        // past `tail` are done being read before we may overwrite them.
        let tail = self.ring.tail.load(Ordering::Acquire);

        let free = N - 1 - (head + N - tail) % N;
        let n = data.len().min(free);

        let buf = self.ring.buf.get();
        for (i, &byte) in data[..n].iter().enumerate() {
            let slot = (head + i) % N;
            // Sole producer; slot is outside the consumer's readable range
            // until the head store below.
            unsafe { (*buf)[slot] = byte };
        }

        // Release publishes the payload bytes together with the new head.
        self.ring.head.store((head + n) % N, Ordering::Release);

        let dropped = data.len() - n;
        if dropped > 0 {
            self.ring.overflow.fetch_add(dropped as u32, Ordering::Relaxed);
        }
        n
    }

    pub fn free_space(&self) -> usize {
        self.ring.free_space()
    }
}

/// Read half. Lives on exactly one core.
pub struct Consumer<'a, const N: usize> {
    ring: &'a Ring<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    /// Copies up to `dst.len()` buffered bytes out. Returns the number read.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        // Acquire pairs with the producer's release of `head`: the payload
        // behind the published head is visible before we read it.
        let head = self.ring.head.load(Ordering::Acquire);

        let used = (head + N - tail) % N;
        let n = dst.len().min(used);

        let buf = self.ring.buf.get();
        for (i, slot_dst) in dst[..n].iter_mut().enumerate() {
            let slot = (tail + i) % N;
            *slot_dst = unsafe { (*buf)[slot] };
        }

        // Release frees the slots for the producer to reuse.
        self.ring.tail.store((tail + n) % N, Ordering::Release);
        n
    }

    pub fn used_space(&self) -> usize {
        self.ring.used_space()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
