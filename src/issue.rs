//! Device-side issue path: the four shapes a kernel-side call site reduces
//! to once it has decided an operation needs the proxy (or, for direct
//! intra-node operations, doesn't).

use crate::backend::type_width;
use crate::context::Context;
use crate::error::Result;
use crate::record::{ Op, RequestRecord };
use crate::validation;

/// Below this size (single work-item), an RMA targeting a mapped peer is
/// issued as a direct memory operation instead of a proxy request.
pub const RMA_DIRECT_THRESHOLD_SINGLE: usize = 16 * 1024;

/// Below this size (work-group leader), an RMA targeting a mapped peer is
/// issued directly.
pub const RMA_DIRECT_THRESHOLD_WORK_GROUP: usize = 32 * 1024;

/// Decides intra-node direct vs. proxy delegation for an RMA of `nbytes`.
/// `peer_mapped` reflects whether an IPC alias exists for the destination
/// PE; without one, direct is never possible regardless of size.
pub fn should_issue_direct(
    enable_gpu_ipc: bool,
    peer_mapped: bool,
    nbytes: usize,
    work_group: bool
) -> bool {
    if !enable_gpu_ipc || !peer_mapped {
        return false;
    }
    let threshold = if work_group {
        RMA_DIRECT_THRESHOLD_WORK_GROUP
    } else {
        RMA_DIRECT_THRESHOLD_SINGLE
    };
    nbytes < threshold
}

/// Direct intra-node put: no record, no completion. Caller has already
/// decided (via [`should_issue_direct`]) that this is safe.
pub fn issue_direct_put(ctx: &Context, dest_pe: usize, dest_ptr: usize, src: &[u8]) -> Result<()> {
    #[cfg(not(feature = "unsafe-perf"))]
    validation::validate_amo(
        &ctx.heap,
        dest_pe as i32,
        ctx.backend.n_pes() as i32,
        dest_ptr,
        src.len()
    )?;
    ctx.backend.put(dest_pe, ctx.heap_offset(dest_ptr), src)
}

/// Direct intra-node get.
pub fn issue_direct_get(
    ctx: &Context,
    src_pe: usize,
    src_ptr: usize,
    dest: &mut [u8]
) -> Result<()> {
    #[cfg(not(feature = "unsafe-perf"))]
    validation::validate_amo(
        &ctx.heap,
        src_pe as i32,
        ctx.backend.n_pes() as i32,
        src_ptr,
        dest.len()
    )?;
    ctx.backend.get(src_pe, ctx.heap_offset(src_ptr), dest)
}

/// Validates a request record against the shape its `(op, type)` implies,
/// one `validate_*` call per operation family, matching the reference's
/// per-entry-point `validate_parameters` calls. Compiled out under
/// `unsafe-perf`.
#[cfg(not(feature = "unsafe-perf"))]
fn validate_request(ctx: &Context, record: &RequestRecord) -> Result<()> {
    let op = record.op()?;
    let type_code = record.type_code()?;
    let width = type_width(type_code);
    let n_pes = ctx.backend.n_pes() as i32;
    let size = (record.nelems as usize) * width;
    let dst = record.dst as usize;
    let src = record.src as usize;
    let heap = &ctx.heap;

    match op {
        Op::Nop
        | Op::NopNoReturn
        | Op::Fence
        | Op::Quiet
        | Op::BarrierAll
        | Op::SyncAll
        | Op::Kill
        | Op::Timestamp
        | Op::Print
        | Op::DebugTest => Ok(()),

        Op::Put | Op::PutNbi | Op::PutWorkGroup | Op::Get | Op::GetNbi | Op::GetWorkGroup =>
            validation::validate_rma(heap, record.dest_pe, n_pes, dst, src, size),

        Op::Iput | Op::Iget =>
            validation::validate_strided_rma(
                heap,
                record.dest_pe,
                n_pes,
                dst,
                src,
                size,
                record.dst_stride(),
                record.src_stride()
            ),

        Op::P => validation::validate_amo(heap, record.dest_pe, n_pes, dst, width),
        Op::G => validation::validate_amo(heap, record.dest_pe, n_pes, src, width),

        Op::AmoFetch
        | Op::AmoSet
        | Op::AmoSwap
        | Op::AmoFetchAdd
        | Op::AmoAdd
        | Op::AmoFetchAnd
        | Op::AmoAnd
        | Op::AmoFetchOr
        | Op::AmoOr
        | Op::AmoFetchXor
        | Op::AmoXor
        | Op::AmoFetchCswap
        | Op::AmoCswap => validation::validate_amo(heap, record.dest_pe, n_pes, dst, width),

        Op::PutSignal | Op::PutSignalNbi =>
            validation::validate_signaling(
                heap,
                record.dest_pe,
                n_pes,
                dst,
                src,
                record.sig_addr as usize,
                size,
                8
            ),

        Op::SignalFetch =>
            validation::validate_amo(heap, record.dest_pe, n_pes, record.sig_addr as usize, 8),

        Op::Test | Op::WaitUntil => validation::validate_test_wait(heap, dst, width),

        Op::Broadcast | Op::BroadcastWorkGroup =>
            validation::validate_broadcast(heap, record.root, n_pes, dst, src, size, size),

        Op::Alltoall
        | Op::AlltoallWorkGroup
        | Op::Collect
        | Op::Fcollect
        | Op::FcollectWorkGroup => validation::validate_alltoall(heap, dst, src, size, size),

        Op::AndReduce
        | Op::OrReduce
        | Op::XorReduce
        | Op::MaxReduce
        | Op::MinReduce
        | Op::SumReduce
        | Op::SumReduceWorkGroup
        | Op::ProdReduce => validation::validate_reduce(heap, dst, src, size),
    }
}

/// Non-blocking proxy issue: `record.completion` stays `0`, so the proxy
/// never signals and the producer never waits. Visible completion is only
/// guaranteed after a later `quiet`.
pub fn issue_nonblocking(ctx: &Context, mut record: RequestRecord) -> Result<u32> {
    #[cfg(not(feature = "unsafe-perf"))]
    validate_request(ctx, &record)?;
    record.completion = 0;
    let index = ctx.ring.send(record, &ctx.metrics);
    ctx.metrics.record_sent();
    Ok(index)
}

/// Blocking proxy issue with no return value (`barrier`, `quiet`,
/// `put_signal`, ...): allocate a completion slot, send, wait, free.
pub fn issue_blocking_void(ctx: &Context, mut record: RequestRecord) -> Result<()> {
    #[cfg(not(feature = "unsafe-perf"))]
    validate_request(ctx, &record)?;
    let slot = ctx.completions.allocate();
    record.completion = slot + 1;
    ctx.ring.send(record, &ctx.metrics);
    ctx.metrics.record_sent();
    ctx.completions.wait(slot);
    ctx.completions.free(slot);
    Ok(())
}

/// Blocking proxy issue with a typed return value (fetching atomics,
/// collectives reporting status): as [`issue_blocking_void`], but reads the
/// completion slot's result before freeing it.
///
/// # Safety
/// `T` must match the type the proxy loop writes into this slot for the
/// record's `(op, type_code)`, and must fit in 16 bytes.
pub unsafe fn issue_blocking_value<T: Copy>(ctx: &Context, mut record: RequestRecord) -> Result<T> {
    #[cfg(not(feature = "unsafe-perf"))]
    validate_request(ctx, &record)?;
    let slot = ctx.completions.allocate();
    record.completion = slot + 1;
    ctx.ring.send(record, &ctx.metrics);
    ctx.metrics.record_sent();
    ctx.completions.wait(slot);
    let result = unsafe { ctx.completions.result::<T>(slot) };
    ctx.completions.free(slot);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ LoopbackBackend, World };
    use crate::config::Config;
    use crate::record::{ Op, TypeCode };
    use std::sync::Arc;
    use std::sync::atomic::{ AtomicBool, Ordering };

    fn make_context() -> Arc<Context> {
        let world = World::new(1, 4096);
        let backend = Arc::new(LoopbackBackend::new(world, 0));
        Context::init(Config::default(), backend).unwrap()
    }

    #[test]
    fn direct_threshold_requires_mapping_and_size() {
        assert!(should_issue_direct(true, true, 1024, false));
        assert!(!should_issue_direct(true, false, 1024, false));
        assert!(!should_issue_direct(false, true, 1024, false));
        assert!(!should_issue_direct(true, true, 1_000_000, false));
        assert!(should_issue_direct(true, true, 20_000, true));
    }

    #[test]
    fn direct_put_get_round_trip_through_backend() {
        let ctx = make_context();
        let ptr = ctx.heap.heap_base() + 0x20;
        issue_direct_put(&ctx, 0, ptr, &[9, 8, 7]).unwrap();
        let mut buf = [0u8; 3];
        issue_direct_get(&ctx, 0, ptr, &mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7]);
    }

    #[test]
    fn nonblocking_issue_does_not_attach_a_completion() {
        let ctx = make_context();
        let record = RequestRecord::new(Op::PutNbi, TypeCode::U8);
        issue_nonblocking(&ctx, record).unwrap();
        assert_eq!(ctx.metrics.snapshot().sent, 1);
    }

    /// Minimal stand-in proxy: drains exactly one record and signals its
    /// completion, just enough to exercise the blocking issue shapes without
    /// a full dispatch loop.
    fn respond_to_next(ctx: &Arc<Context>, next: u32) {
        loop {
            if let Some(record) = ctx.ring.try_poll(next) {
                if !record.is_fire_and_forget() {
                    let slot = record.completion - 1;
                    unsafe {
                        ctx.completions.set_result(slot, 7u64);
                    }
                    ctx.completions.signal(slot);
                }
                return;
            }
            std::hint::spin_loop();
        }
    }

    #[test]
    fn blocking_void_waits_for_proxy_signal() {
        let ctx = make_context();
        let running = Arc::new(AtomicBool::new(true));
        let responder_ctx = ctx.clone();
        let responder_running = running.clone();
        let responder = std::thread::spawn(move || {
            while responder_running.load(Ordering::Relaxed) {
                respond_to_next(&responder_ctx, 0);
                break;
            }
        });

        let record = RequestRecord::new(Op::Quiet, TypeCode::Mem);
        issue_blocking_void(&ctx, record).unwrap();
        running.store(false, Ordering::Relaxed);
        responder.join().unwrap();
    }

    #[test]
    fn blocking_value_reads_result_before_freeing_slot() {
        let ctx = make_context();
        let responder_ctx = ctx.clone();
        let responder = std::thread::spawn(move || {
            respond_to_next(&responder_ctx, 0);
        });

        let record = RequestRecord::new(Op::AmoFetchAdd, TypeCode::U64);
        let value: u64 = unsafe { issue_blocking_value(&ctx, record).unwrap() };
        assert_eq!(value, 7);
        responder.join().unwrap();
    }
}
