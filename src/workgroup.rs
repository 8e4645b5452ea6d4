//! Work-group vectorized copy helpers: the cooperative data-movement inner
//! loop used when a whole work-group issues one logical RMA. Each simulated
//! work-item copies a strided subset of an aligned buffer; head and tail
//! bytes that don't fit the vector width are distributed across items before
//! and after the aligned body.

/// Vector width, in bytes, used for the aligned body of a work-group copy.
pub const VL: usize = 16;

/// Computes `(start, len)` for work-item `item_id` out of `n_items` items
/// cooperatively copying `total` elements, distributing the remainder across
/// the first items so every element is copied by exactly one item.
pub fn work_item_offset(item_id: usize, n_items: usize, total: usize) -> (usize, usize) {
    assert!(item_id < n_items);
    let base = total / n_items;
    let remainder = total % n_items;
    if item_id < remainder {
        (item_id * (base + 1), base + 1)
    } else {
        (remainder * (base + 1) + (item_id - remainder) * base, base)
    }
}

/// Cooperative push copy: work-item `item_id` of `n_items` copies its share
/// of `src` into `dst`. Head/tail bytes that fall outside the `VL`-aligned
/// body are copied byte-by-byte; the aligned body is copied in `VL`-sized
/// chunks. Every byte is written by exactly one item.
pub fn vec_copy_work_group_push(dst: &mut [u8], src: &[u8], item_id: usize, n_items: usize) {
    assert_eq!(dst.len(), src.len());
    let len = dst.len();

    let head = (VL - (dst.as_ptr() as usize % VL)) % VL;
    let head = head.min(len);
    let aligned_len = (len - head) - ((len - head) % VL);
    let tail = len - head - aligned_len;

    if item_id == 0 {
        dst[0..head].copy_from_slice(&src[0..head]);
    }
    if item_id == n_items - 1 {
        dst[head + aligned_len..len].copy_from_slice(&src[head + aligned_len..len]);
    }

    if aligned_len == 0 {
        return;
    }
    let n_chunks = aligned_len / VL;
    let (chunk_start, chunk_count) = work_item_offset(item_id, n_items, n_chunks);
    let byte_start = head + chunk_start * VL;
    let byte_len = chunk_count * VL;
    dst[byte_start..byte_start + byte_len].copy_from_slice(&src[byte_start..byte_start + byte_len]);
    let _ = tail;
}

/// Cooperative pull copy: identical data-movement contract to
/// [`vec_copy_work_group_push`], but named separately because the reference
/// distinguishes the two by which side owns the aligned vector path — only
/// the direction that issued the operation uses wide accesses.
pub fn vec_copy_work_group_pull(dst: &mut [u8], src: &[u8], item_id: usize, n_items: usize) {
    vec_copy_work_group_push(dst, src, item_id, n_items)
}

/// Runs a cooperative copy across `n_items` simulated work-items on ordinary
/// threads, joining before returning so the work-group leader's subsequent
/// release fence (performed by the caller) observes every item's writes.
pub fn run_work_group_copy(dst: &mut [u8], src: &[u8], n_items: usize) {
    if n_items <= 1 {
        vec_copy_work_group_push(dst, src, 0, 1);
        return;
    }
    std::thread::scope(|scope| {
        for item_id in 0..n_items {
            let dst_ptr = dst.as_mut_ptr();
            let dst_len = dst.len();
            let src_ptr = src.as_ptr();
            scope.spawn(move || {
                // SAFETY: `work_item_offset` partitions `[0, dst_len)` into
                // disjoint ranges across `item_id`, so each thread only
                // touches bytes no other thread writes.
                let dst_slice = unsafe { std::slice::from_raw_parts_mut(dst_ptr, dst_len) };
                let src_slice = unsafe { std::slice::from_raw_parts(src_ptr, dst_len) };
                vec_copy_work_group_push(dst_slice, src_slice, item_id, n_items);
            });
        }
    });
    std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_partition_without_gaps_or_overlap() {
        for n_items in 1..=8 {
            for total in 0..40 {
                let mut covered = vec![false; total];
                for item_id in 0..n_items {
                    let (start, len) = work_item_offset(item_id, n_items, total);
                    for i in start..start + len {
                        assert!(!covered[i], "double-covered at n_items={n_items} total={total}");
                        covered[i] = true;
                    }
                }
                assert!(covered.iter().all(|&c| c), "gap at n_items={n_items} total={total}");
            }
        }
    }

    #[test]
    fn single_item_copies_everything() {
        let src: Vec<u8> = (0..37u8).collect();
        let mut dst = vec![0u8; 37];
        vec_copy_work_group_push(&mut dst, &src, 0, 1);
        assert_eq!(dst, src);
    }

    #[test]
    fn misaligned_head_and_tail_are_copied_correctly() {
        for len in 1..40 {
            let src: Vec<u8> = (0..len as u8).collect();
            let mut dst = vec![0u8; len];
            run_work_group_copy(&mut dst, &src, 4);
            assert_eq!(dst, src, "mismatch for len={len}");
        }
    }

    #[test]
    fn cooperative_copy_matches_serial_copy() {
        let src: Vec<u8> = (0..256u8).cycle().take(1000).collect();
        let mut dst = vec![0u8; 1000];
        run_work_group_copy(&mut dst, &src, 8);
        assert_eq!(dst, src);
    }
}
