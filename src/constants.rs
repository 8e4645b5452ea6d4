//! Wire-level constants shared by the record, ring and completion table.

/// Capacity of the request ring; must be a power of two and `<= 2^16` so the
/// record's 16-bit `sequence` field can always represent a slot's producer index.
pub const RING_N: usize = 4096;

/// Upper bound on PEs local to a single node (size of `ipc_buffer_delta`).
pub const MAX_LOCAL_PES: usize = 64;

/// Number of out-of-band message buffers used for printf-style upcalls.
pub const NUM_MESSAGES: usize = 32;

/// Size in bytes of a message buffer slot.
pub const MAX_PROXY_MSG_SIZE: usize = 128;

/// The proxy republishes its consumer index every `(n + 1) & MASK == 0` slots.
pub const UPDATE_RECEIVE_INTERVAL_MASK: u32 = 0x7f;

/// Number of simulated cooperative work-items used for a `*_work_group`
/// dispatch's local copy. The record format carries no group-size field, so
/// this stands in for a warp/wavefront width.
pub const WORK_GROUP_SIMULATED_ITEMS: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_n_is_power_of_two_and_fits_u16() {
        assert!(RING_N.is_power_of_two());
        assert!(RING_N <= (1 << 16));
    }
}
