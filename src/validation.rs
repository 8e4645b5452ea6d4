//! Parameter validation, grounded directly on the reference's
//! `validate_parameters` overloads: one shaped validator per operation family.
//!
//! Compiled to nothing when the `unsafe-perf` feature is enabled, matching
//! the reference's build-time checking flag.

use crate::addressing::SymmetricHeap;
use crate::error::{ ProxyError, Result };

pub fn validate_pe(pe: i32, n_pes: i32) -> Result<()> {
    if pe < 0 || pe >= n_pes {
        return Err(ProxyError::validation(format!("PE {pe} out of range [0, {n_pes})")));
    }
    Ok(())
}

pub fn validate_object_on_symmetric_heap(heap: &SymmetricHeap, ptr: usize, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    if !heap.object_in_heap(ptr, size) {
        return Err(ProxyError::validation("object not on symmetric heap".to_string()));
    }
    Ok(())
}

pub fn validate_objects_dont_overlap(
    ptr1: usize,
    ptr2: usize,
    size1: usize,
    size2: usize
) -> Result<()> {
    if size1 == 0 || size2 == 0 {
        return Ok(());
    }
    let hi1 = ptr1 + size1 - 1;
    let hi2 = ptr2 + size2 - 1;
    if ptr1 <= hi2 && ptr2 <= hi1 {
        return Err(ProxyError::validation("overlapping arguments".to_string()));
    }
    Ok(())
}

pub fn validate_stride(stride: i64) -> Result<()> {
    if stride <= 0 {
        return Err(ProxyError::validation(format!("nonpositive stride {stride}")));
    }
    Ok(())
}

/// AMO / P / G shape: a single pointer.
pub fn validate_amo(heap: &SymmetricHeap, pe: i32, n_pes: i32, ptr: usize, size: usize) -> Result<()> {
    validate_pe(pe, n_pes)?;
    validate_object_on_symmetric_heap(heap, ptr, size)
}

/// RMA shape: two buffers of the same size that must not overlap.
pub fn validate_rma(
    heap: &SymmetricHeap,
    pe: i32,
    n_pes: i32,
    ptr1: usize,
    ptr2: usize,
    size: usize
) -> Result<()> {
    validate_pe(pe, n_pes)?;
    validate_object_on_symmetric_heap(heap, ptr1, size)?;
    validate_objects_dont_overlap(ptr1, ptr2, size, size)
}

/// Strided RMA shape: RMA plus positive strides on both sides.
pub fn validate_strided_rma(
    heap: &SymmetricHeap,
    pe: i32,
    n_pes: i32,
    ptr1: usize,
    ptr2: usize,
    size: usize,
    dst_stride: i64,
    src_stride: i64
) -> Result<()> {
    validate_rma(heap, pe, n_pes, ptr1, ptr2, size)?;
    validate_stride(dst_stride)?;
    validate_stride(src_stride)
}

/// Broadcast shape: root PE plus disjoint dest/src buffers, possibly of
/// different sizes.
pub fn validate_broadcast(
    heap: &SymmetricHeap,
    root: i32,
    n_pes: i32,
    dest: usize,
    src: usize,
    dest_size: usize,
    src_size: usize
) -> Result<()> {
    validate_pe(root, n_pes)?;
    validate_object_on_symmetric_heap(heap, dest, dest_size)?;
    validate_object_on_symmetric_heap(heap, src, src_size)?;
    validate_objects_dont_overlap(dest, src, dest_size, src_size)
}

/// Signaling-operation shape: data pointer, peer pointer, and a signal
/// address, pairwise disjoint.
pub fn validate_signaling(
    heap: &SymmetricHeap,
    pe: i32,
    n_pes: i32,
    ptr1: usize,
    ptr2: usize,
    sig_addr: usize,
    size: usize,
    sig_addr_size: usize
) -> Result<()> {
    validate_pe(pe, n_pes)?;
    validate_object_on_symmetric_heap(heap, ptr1, size)?;
    validate_object_on_symmetric_heap(heap, sig_addr, sig_addr_size)?;
    validate_objects_dont_overlap(ptr1, ptr2, size, size)?;
    validate_objects_dont_overlap(ptr1, sig_addr, size, sig_addr_size)?;
    validate_objects_dont_overlap(ptr2, sig_addr, size, sig_addr_size)
}

/// Test/wait shape: a single observed variable.
pub fn validate_test_wait(heap: &SymmetricHeap, ivar: usize, size: usize) -> Result<()> {
    validate_object_on_symmetric_heap(heap, ivar, size)
}

/// Reduce shape: dest/src, overlap allowed only when they are the same
/// buffer (in-place reduce).
pub fn validate_reduce(heap: &SymmetricHeap, dest: usize, src: usize, size: usize) -> Result<()> {
    validate_object_on_symmetric_heap(heap, dest, size)?;
    validate_object_on_symmetric_heap(heap, src, size)?;
    if dest != src {
        validate_objects_dont_overlap(dest, src, size, size)?;
    }
    Ok(())
}

/// Alltoall/fcollect shape: dest/src of possibly different sizes, always
/// disjoint.
pub fn validate_alltoall(
    heap: &SymmetricHeap,
    dest: usize,
    src: usize,
    dest_size: usize,
    src_size: usize
) -> Result<()> {
    validate_object_on_symmetric_heap(heap, dest, dest_size)?;
    validate_object_on_symmetric_heap(heap, src, src_size)?;
    validate_objects_dont_overlap(dest, src, dest_size, src_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> SymmetricHeap {
        SymmetricHeap::new(0x1000, 0x1000, 0)
    }

    #[test]
    fn pe_range_is_checked() {
        assert!(validate_pe(0, 2).is_ok());
        assert!(validate_pe(1, 2).is_ok());
        assert!(validate_pe(2, 2).is_err());
        assert!(validate_pe(-1, 2).is_err());
    }

    #[test]
    fn zero_size_object_skips_heap_check() {
        assert!(validate_object_on_symmetric_heap(&heap(), 0xdead_beef, 0).is_ok());
    }

    #[test]
    fn off_heap_object_is_rejected() {
        assert!(validate_object_on_symmetric_heap(&heap(), 0x0500, 0x10).is_err());
    }

    #[test]
    fn overlap_is_detected_both_directions() {
        assert!(validate_objects_dont_overlap(0x1000, 0x1008, 0x10, 0x10).is_err());
        assert!(validate_objects_dont_overlap(0x1000, 0x1010, 0x10, 0x10).is_ok());
    }

    #[test]
    fn zero_size_never_overlaps() {
        assert!(validate_objects_dont_overlap(0x1000, 0x1000, 0, 0x10).is_ok());
    }

    #[test]
    fn stride_must_be_positive() {
        assert!(validate_stride(1).is_ok());
        assert!(validate_stride(0).is_err());
        assert!(validate_stride(-1).is_err());
    }

    #[test]
    fn reduce_allows_in_place_aliasing() {
        let h = heap();
        assert!(validate_reduce(&h, 0x1000, 0x1000, 0x10).is_ok());
        assert!(validate_reduce(&h, 0x1000, 0x1008, 0x10).is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn overlap_check_is_symmetric_in_its_arguments(
            p1 in 0usize..0x10000,
            s1 in 1usize..0x100,
            p2 in 0usize..0x10000,
            s2 in 1usize..0x100
        ) {
            let a = validate_objects_dont_overlap(p1, p2, s1, s2).is_err();
            let b = validate_objects_dont_overlap(p2, p1, s2, s1).is_err();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn identical_nonzero_ranges_always_overlap(p in 0usize..0x10000, s in 1usize..0x100) {
            prop_assert!(validate_objects_dont_overlap(p, p, s, s).is_err());
        }
    }
}
