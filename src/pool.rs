use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Recycler for per-segment occupancy buffers.
///
/// Every buffer has the length fixed at construction. Workers acquire one,
/// own it exclusively while they sieve, and hand it back afterwards, so the
/// number of live allocations follows the number of concurrent workers rather
/// than the number of segments.
pub struct SegmentPool {
    segment_len: usize,
    free: SegQueue<Vec<bool>>,
    allocated: AtomicUsize,
}

impl SegmentPool {
    pub fn new(segment_len: usize) -> Self {
        Self {
            segment_len,
            free: SegQueue::new(),
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    /// Returns a buffer of `segment_len` flags, all `false`.
    pub fn acquire(&self) -> Vec<bool> {
        match self.free.pop() {
            Some(mut buffer) => {
                buffer.fill(false);
                buffer
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![false; self.segment_len]
            }
        }
    }

    pub fn release(&self, buffer: Vec<bool>) {
        debug_assert_eq!(buffer.len(), self.segment_len);
        self.free.push(buffer);
    }

    /// Number of buffers this pool has ever allocated.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
