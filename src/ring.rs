//! The request ring: a fixed-capacity circular buffer of request records
//! shared between producer threads and the proxy loop, backed by a single
//! host-mapped memory region so the consumer observes producer writes
//! without an intervening copy.
//!
//! Adapted from the file-backed `SharedRingBuffer` pattern, but single-process
//! (an anonymous `memmap2` mapping stands in for the device-visible host
//! memory) and shaped around the reference's fetch-add/flow-control/wide-store
//! protocol rather than a cursor-pair disruptor.

use std::sync::atomic::{ AtomicU32, Ordering };

use memmap2::MmapMut;

use crate::constants::{ RING_N, UPDATE_RECEIVE_INTERVAL_MASK };
use crate::error::Result;
use crate::metrics::Metrics;
use crate::record::RequestRecord;

const RECORD_SIZE: usize = std::mem::size_of::<RequestRecord>();

/// The request ring. One instance is shared (via `Arc`) by every producer
/// thread and the single proxy thread that owns polling.
pub struct RequestRing {
    mmap: MmapMut,
    /// Producer-side counter; incremented by fetch-add per enqueue.
    next_send: AtomicU32,
    /// Device-visible, host-published consumer position (`peer_receive` in
    /// the reference). Starts at `RING_N` so the first wave of producers is
    /// granted immediately.
    peer_receive: AtomicU32,
}

// SAFETY: the mmap'd region is only ever accessed through volatile reads/writes
// at disjoint slot offsets once flow control has granted a slot, mirroring the
// reference's host-mapped-memory contract.
unsafe impl Send for RequestRing {}
unsafe impl Sync for RequestRing {}

impl RequestRing {
    pub fn new() -> Result<Self> {
        let mmap = MmapMut::map_anon(RING_N * RECORD_SIZE)?;
        Ok(Self {
            mmap,
            next_send: AtomicU32::new(0),
            peer_receive: AtomicU32::new(RING_N as u32),
        })
    }

    fn slot_ptr(&self, index: u32) -> *mut RequestRecord {
        let offset = (index as usize % RING_N) * RECORD_SIZE;
        // SAFETY: offset is always within `RING_N * RECORD_SIZE`, and
        // `RequestRecord` is `Pod`/fixed-size so any bit pattern is valid.
        unsafe { self.mmap.as_ptr().add(offset) as *mut RequestRecord }
    }

    /// Producer-side enqueue. Stamps `record.sequence`, spins on flow control,
    /// then performs the software-ordered publish: payload fields first, a
    /// release fence, and the `sequence` field last — the reference's
    /// fallback for targets without a single-transaction wide store.
    ///
    /// Returns the producer index the record was assigned to (used by
    /// callers that need to correlate ordering within one producer).
    pub fn send(&self, mut record: RequestRecord, metrics: &Metrics) -> u32 {
        let my_index = self.next_send.fetch_add(1, Ordering::SeqCst);
        record.sequence = (my_index & 0xffff) as u16;

        while my_index.wrapping_sub(self.peer_receive.load(Ordering::SeqCst)) >= (RING_N as u32) {
            crate::insights::record_backpressure();
            metrics.record_backpressure_spin();
            std::hint::spin_loop();
        }

        let slot = self.slot_ptr(my_index);
        let mut without_sequence = record;
        without_sequence.sequence = 0;
        unsafe {
            std::ptr::write_volatile(slot, without_sequence);
        }
        std::sync::atomic::fence(Ordering::Release);
        unsafe {
            std::ptr::write_volatile(std::ptr::addr_of_mut!((*slot).sequence), record.sequence);
        }

        my_index
    }

    /// Consumer-side: checks whether the slot at `expected` is ready (its
    /// `sequence` field matches the expected low-16 bits). Non-blocking.
    pub fn try_poll(&self, expected: u32) -> Option<RequestRecord> {
        let slot = self.slot_ptr(expected);
        let seq = unsafe { std::ptr::read_volatile(std::ptr::addr_of!((*slot).sequence)) };
        if seq != (expected & 0xffff) as u16 {
            return None;
        }
        std::sync::atomic::fence(Ordering::Acquire);
        Some(unsafe { std::ptr::read_volatile(slot) })
    }

    /// Republishes the consumer position so producers currently spinning on
    /// flow control can proceed. Called by the proxy loop every
    /// `UPDATE_RECEIVE_INTERVAL_MASK + 1` slots.
    pub fn republish_receive(&self, next_receive: u32, metrics: &Metrics) {
        self.peer_receive.store(next_receive, Ordering::SeqCst);
        crate::insights::record_republish(next_receive);
        metrics.record_republish();
    }

    /// Whether `next_receive` is a throttle point at which the consumer
    /// should republish its position.
    pub fn should_republish(next_receive: u32) -> bool {
        next_receive & UPDATE_RECEIVE_INTERVAL_MASK == 0
    }

    pub fn capacity(&self) -> usize {
        RING_N
    }
}

impl std::fmt::Debug for RequestRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRing")
            .field("next_send", &self.next_send.load(Ordering::Relaxed))
            .field("peer_receive", &self.peer_receive.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ Op, TypeCode };

    #[test]
    fn send_then_poll_round_trip() {
        let ring = RequestRing::new().unwrap();
        let metrics = Metrics::new();
        let mut rec = RequestRecord::new(Op::Put, TypeCode::I64);
        rec.dest_pe = 1;
        rec.nelems = 16;
        let idx = ring.send(rec, &metrics);
        let polled = ring.try_poll(idx).expect("slot should be ready");
        assert_eq!(polled.dest_pe, 1);
        assert_eq!(polled.nelems, 16);
        assert_eq!(polled.op().unwrap(), Op::Put);
    }

    #[test]
    fn poll_before_send_is_not_ready() {
        let ring = RequestRing::new().unwrap();
        assert!(ring.try_poll(0).is_none());
    }

    #[test]
    fn republish_cadence_matches_mask() {
        assert!(RequestRing::should_republish(0));
        assert!(!RequestRing::should_republish(1));
        assert!(RequestRing::should_republish(128));
        assert!(!RequestRing::should_republish(129));
    }

    #[test]
    fn flow_control_initial_grant_covers_full_ring() {
        let ring = RequestRing::new().unwrap();
        let metrics = Metrics::new();
        // With peer_receive == RING_N initially, the first RING_N sends must
        // not block.
        for _ in 0..ring.capacity() {
            let rec = RequestRecord::new(Op::Nop, TypeCode::Mem);
            ring.send(rec, &metrics);
        }
    }

    #[test]
    fn many_producers_assign_distinct_indices() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(RequestRing::new().unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ring = ring.clone();
            handles.push(
                thread::spawn(move || {
                    let metrics = Metrics::new();
                    let mut indices = Vec::new();
                    for _ in 0..16 {
                        let rec = RequestRecord::new(Op::Nop, TypeCode::Mem);
                        indices.push(ring.send(rec, &metrics));
                    }
                    indices
                })
            );
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 8 * 16);
    }
}
