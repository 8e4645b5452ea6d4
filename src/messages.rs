//! Out-of-band message buffers: a small fixed pool used by `Print` and
//! `DebugTest` upcalls to carry a formatted string from producer to proxy
//! alongside the 128-byte request record, which has no room for one.

use std::cell::UnsafeCell;
use std::sync::atomic::{ AtomicUsize, Ordering };

use crate::constants::{ MAX_PROXY_MSG_SIZE, NUM_MESSAGES };

/// Fixed pool of `NUM_MESSAGES` byte buffers, each `MAX_PROXY_MSG_SIZE` long.
/// Slots are handed out round-robin; callers are expected to have already
/// drained a slot (the record carrying it completed) before its index is
/// reused `NUM_MESSAGES` writes later.
pub struct MessagePool {
    slots: Box<[UnsafeCell<[u8; MAX_PROXY_MSG_SIZE]>]>,
    cursor: AtomicUsize,
}

// SAFETY: each write claims a distinct slot via the cursor fetch-add, and a
// reader only inspects a slot after the record referencing it has completed,
// which is synchronized through the completion table's release/acquire pair.
unsafe impl Sync for MessagePool {}

impl MessagePool {
    pub fn new() -> Self {
        let slots = (0..NUM_MESSAGES)
            .map(|_| UnsafeCell::new([0u8; MAX_PROXY_MSG_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots, cursor: AtomicUsize::new(0) }
    }

    /// Writes `text` (truncated to fit) into the next slot and returns its
    /// index.
    pub fn write(&self, text: &str) -> u16 {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let bytes = text.as_bytes();
        let len = bytes.len().min(MAX_PROXY_MSG_SIZE - 1);
        // SAFETY: `index` is this call's exclusively claimed slot.
        let buf = unsafe { &mut *self.slots[index].get() };
        buf[..len].copy_from_slice(&bytes[..len]);
        buf[len] = 0;
        index as u16
    }

    /// Reads the nul-terminated string out of `slot`.
    pub fn read(&self, slot: u16) -> String {
        // SAFETY: caller has already observed completion of the request that
        // wrote this slot.
        let buf = unsafe { &*self.slots[slot as usize].get() };
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}
