//! A bounded SPSC ring for samples.
//!
//! This is the buffer which sits between a capture callback (the only writer) and an output callback (the only
//! reader).  Both halves work in slices: one pair of atomic operations is paid per block rather than per sample, which
//! matters when the block is a few hundred stereo frames arriving on a driver thread.
//!
//! The ring never blocks and never allocates after construction.  When the writer offers more than fits, the ring
//! takes what it can and reports how much that was; the caller decides what to do with the rest.  When the reader
//! asks for more than is there, it gets what is there.  The reader may also throw away the oldest queued items with
//! [RingReader::discard], which is how a consumer catches up when it has fallen too far behind.
//!
//! Elements must be [bytemuck::Zeroable] and [Copy]: slots are zero-initialized up front so that no uninitialized
//! memory is ever exposed, and nothing stored here needs dropping.
//!
//! Positions are two monotonically increasing `u64` counters.  `produced - consumed` is the fill level, and the index
//! of a slot is the counter modulo the capacity.  The modulo goes through [reciprocal] so that capacities need not be
//! powers of two.  A ring panics after `u64::MAX` items have gone through it, which at any audio rate is never.
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Zeroable;
use crossbeam::utils::CachePadded;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    divider: reciprocal::Reciprocal,

    /// Count of items the reader has finished with.  Written only by the reader.
    consumed: CachePadded<AtomicU64>,

    /// Count of items the writer has published.  Written only by the writer.
    produced: CachePadded<AtomicU64>,
}

// Safety: a slot is only ever touched by one half at a time.  The writer touches `[produced, consumed + capacity)`,
// the reader `[consumed, produced)`, and the counters are published with release/acquire pairs.
unsafe impl<T: Send> Sync for Shared<T> {}

/// Where a run of `len` items starting at a counter value lands in the slot array.
///
/// The second range is empty unless the run wraps past the end.
struct Segments {
    first_start: usize,
    first_len: usize,
    second_len: usize,
}

impl<T: Zeroable + Copy + Send + 'static> Shared<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity != 0, "A ring must be able to hold something");

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(T::zeroed()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Shared {
            slots,
            divider: reciprocal::Reciprocal::new(capacity as u64).unwrap(),
            consumed: CachePadded::new(AtomicU64::new(0)),
            produced: CachePadded::new(AtomicU64::new(0)),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `counter % capacity`.
    fn wrap(&self, counter: u64) -> usize {
        let whole = self.divider.apply(counter) * self.capacity() as u64;
        let rem = counter - whole;
        debug_assert!(rem < self.capacity() as u64);
        rem as usize
    }

    fn segments(&self, start: u64, len: usize) -> Segments {
        let first_start = self.wrap(start);
        let first_len = len.min(self.capacity() - first_start);
        Segments {
            first_start,
            first_len,
            second_len: len - first_len,
        }
    }

    fn base_ptr(&self) -> *mut T {
        // UnsafeCell<T> has the same layout as T.
        self.slots.as_ptr() as *mut T
    }

    fn fill_level(&self, consumed: u64, produced: u64) -> usize {
        produced
            .checked_sub(consumed)
            .expect("The reader overtook the writer") as usize
    }

    /// Copy out of the ring.  Caller must be the reader.
    unsafe fn read_into(&self, dest: &mut [T]) -> usize {
        let consumed = self.consumed.load(Ordering::Relaxed);
        // Acquire: pairs with the writer's release so that the slots we are about to read are fully written.
        let produced = self.produced.load(Ordering::Acquire);
        let count = self.fill_level(consumed, produced).min(dest.len());
        if count == 0 {
            return 0;
        }

        let seg = self.segments(consumed, count);
        let base = self.base_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(
                base.add(seg.first_start),
                dest.as_mut_ptr(),
                seg.first_len,
            );
            std::ptr::copy_nonoverlapping(
                base,
                dest.as_mut_ptr().add(seg.first_len),
                seg.second_len,
            );
        }

        // Release: the writer must not reuse these slots until our copy is done.
        self.advance_consumed(consumed, count);
        count
    }

    /// Copy into the ring.  Caller must be the writer.
    unsafe fn write_from(&self, src: &[T]) -> usize {
        let produced = self.produced.load(Ordering::Relaxed);
        let consumed = self.consumed.load(Ordering::Acquire);
        let free = self.capacity() - self.fill_level(consumed, produced);
        let count = free.min(src.len());
        if count == 0 {
            return 0;
        }

        let seg = self.segments(produced, count);
        let base = self.base_ptr();
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(seg.first_start), seg.first_len);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(seg.first_len), base, seg.second_len);
        }

        let next = produced
            .checked_add(count as u64)
            .expect("The ring counter wrapped");
        self.produced.store(next, Ordering::Release);
        count
    }

    /// Drop up to `count` of the oldest items.  Caller must be the reader.
    unsafe fn discard(&self, count: usize) -> usize {
        let consumed = self.consumed.load(Ordering::Relaxed);
        let produced = self.produced.load(Ordering::Acquire);
        let count = self.fill_level(consumed, produced).min(count);
        if count != 0 {
            self.advance_consumed(consumed, count);
        }
        count
    }

    fn advance_consumed(&self, consumed: u64, count: usize) {
        let next = consumed
            .checked_add(count as u64)
            .expect("The ring counter wrapped");
        self.consumed.store(next, Ordering::Release);
    }

    fn readable(&self) -> usize {
        let consumed = self.consumed.load(Ordering::Relaxed);
        let produced = self.produced.load(Ordering::Acquire);
        self.fill_level(consumed, produced)
    }
}

/// The consuming half of a ring.
pub struct RingReader<T: Zeroable + Copy + Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// The producing half of a ring.
pub struct RingWriter<T: Zeroable + Copy + Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// Allocate a ring holding up to `capacity` items.
///
/// # Panics
///
/// Panics if `capacity == 0`.
pub fn create_ring<T: Zeroable + Copy + Send + 'static>(
    capacity: usize,
) -> (RingReader<T>, RingWriter<T>) {
    let shared = Arc::new(Shared::new(capacity));
    (
        RingReader {
            shared: shared.clone(),
        },
        RingWriter { shared },
    )
}

impl<T: Zeroable + Copy + Send + 'static> RingReader<T> {
    /// Read as much as possible into `dest`, returning how many items were read.  Never blocks.
    pub fn read_to_slice(&mut self, dest: &mut [T]) -> usize {
        if dest.is_empty() {
            return 0;
        }
        unsafe { self.shared.read_into(dest) }
    }

    /// Throw away up to `count` of the oldest items without reading them.  Returns how many were dropped.
    pub fn discard(&mut self, count: usize) -> usize {
        unsafe { self.shared.discard(count) }
    }

    /// How many items are waiting.  The true value is `>=` this, since the writer may be mid-write.
    pub fn available(&self) -> usize {
        self.shared.readable()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl<T: Zeroable + Copy + Send + 'static> RingWriter<T> {
    /// Write as much of `src` as fits, returning how many items were taken.  Never blocks.
    ///
    /// Whatever was not taken is the caller's to drop or retry.
    pub fn write_from_slice(&mut self, src: &[T]) -> usize {
        if src.is_empty() {
            return 0;
        }
        unsafe { self.shared.write_from(src) }
    }

    /// How much space there is for writing.  The true value is `>=` this, since the reader may be mid-read.
    pub fn available(&self) -> usize {
        self.shared.capacity() - self.shared.readable()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::thread::spawn;

    use proptest::prelude::*;

    // Loom cannot model the spinning that the threaded tests do, so these use real threads and lean on volume.

    #[test]
    fn test_write_read_simple() {
        let (mut reader, mut writer) = create_ring(5);

        let mut out = [0u64; 1];
        for i in 0..10u64 {
            assert_eq!(writer.write_from_slice(&[i]), 1);
            assert_eq!(reader.read_to_slice(&mut out), 1);
            assert_eq!(out[0], i);
        }
        assert_eq!(reader.read_to_slice(&mut out), 0);
    }

    #[test]
    fn test_partial_write_when_full() {
        let (mut reader, mut writer) = create_ring::<f32>(4);

        assert_eq!(writer.write_from_slice(&[1.0, 2.0, 3.0]), 3);
        // Only one slot left; the tail of this block does not fit.
        assert_eq!(writer.write_from_slice(&[4.0, 5.0, 6.0]), 1);
        assert_eq!(writer.available(), 0);

        let mut out = [0.0f32; 8];
        assert_eq!(reader.read_to_slice(&mut out), 4);
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_discard_drops_oldest() {
        let (mut reader, mut writer) = create_ring::<u32>(6);
        writer.write_from_slice(&[1, 2, 3, 4, 5]);

        assert_eq!(reader.discard(3), 3);
        assert_eq!(reader.available(), 2);
        assert_eq!(reader.discard(10), 2);
        assert_eq!(reader.available(), 0);

        // Discarding frees space for the writer.
        assert_eq!(writer.write_from_slice(&[6, 7, 8, 9, 10, 11]), 6);
        let mut out = [0u32; 6];
        assert_eq!(reader.read_to_slice(&mut out), 6);
        assert_eq!(out, [6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_wrapping_reads_cross_the_end() {
        let (mut reader, mut writer) = create_ring::<u16>(5);
        writer.write_from_slice(&[0, 1, 2]);
        let mut scratch = [0u16; 3];
        reader.read_to_slice(&mut scratch);

        // Now the counters sit at 3; this write wraps.
        assert_eq!(writer.write_from_slice(&[10, 11, 12, 13, 14]), 5);
        let mut out = [0u16; 5];
        assert_eq!(reader.read_to_slice(&mut out), 5);
        assert_eq!(out, [10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_multithreaded_batches() {
        struct Opts {
            capacity: usize,
            write_batch: usize,
            read_batch: usize,
        }

        fn run(
            Opts {
                capacity,
                write_batch,
                read_batch,
            }: Opts,
        ) {
            const TOTAL: u64 = 100000;
            let (mut reader, mut writer) = create_ring::<u64>(capacity);

            let producer = spawn(move || {
                let data = (0..TOTAL).collect::<Vec<_>>();
                for chunk in data.chunks(write_batch) {
                    let mut done = 0;
                    while done < chunk.len() {
                        done += writer.write_from_slice(&chunk[done..]);
                        std::thread::yield_now();
                    }
                }
            });

            let mut expected = 0u64;
            let mut dest = vec![0u64; read_batch];
            while expected < TOTAL {
                let got = reader.read_to_slice(&mut dest);
                for v in &dest[..got] {
                    assert_eq!(*v, expected);
                    expected += 1;
                }
                if got == 0 {
                    std::thread::yield_now();
                }
            }

            producer.join().unwrap();
        }

        run(Opts {
            capacity: 100,
            write_batch: 3,
            read_batch: 6,
        });
        run(Opts {
            capacity: 100,
            write_batch: 6,
            read_batch: 3,
        });
        run(Opts {
            capacity: 17640,
            write_batch: 1102,
            read_batch: 1024,
        });
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(usize),
        Read(usize),
        Discard(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..40).prop_map(Op::Write),
            (0usize..40).prop_map(Op::Read),
            (0usize..20).prop_map(Op::Discard),
        ]
    }

    proptest! {
        /// Single-threaded, the ring must behave exactly like a bounded deque.
        #[test]
        fn test_matches_bounded_deque(capacity in 1usize..32, ops in prop::collection::vec(op_strategy(), 0..64)) {
            let (mut reader, mut writer) = create_ring::<u32>(capacity);
            let mut model: VecDeque<u32> = VecDeque::new();
            let mut next = 0u32;

            for op in ops {
                match op {
                    Op::Write(n) => {
                        let batch = (next..next + n as u32).collect::<Vec<_>>();
                        next += n as u32;
                        let took = writer.write_from_slice(&batch);
                        let fits = n.min(capacity - model.len());
                        prop_assert_eq!(took, fits);
                        model.extend(&batch[..took]);
                    }
                    Op::Read(n) => {
                        let mut out = vec![0u32; n];
                        let got = reader.read_to_slice(&mut out);
                        let expected = model.drain(..n.min(model.len())).collect::<Vec<_>>();
                        prop_assert_eq!(&out[..got], &expected[..]);
                    }
                    Op::Discard(n) => {
                        let dropped = reader.discard(n);
                        prop_assert_eq!(dropped, n.min(model.len()));
                        model.drain(..dropped);
                    }
                }
                prop_assert_eq!(reader.available(), model.len());
            }
        }
    }
}
