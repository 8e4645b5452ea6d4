//! The host-side proxy loop: drains the request ring, dispatches each record
//! to the backend, and signals completion. Shaped after the consumer
//! run-loop pattern — spin while a stop flag is clear, dispatch via a single
//! `match`, yield through a [`crate::wait_strategy::WaitStrategy`] when idle.

use std::sync::Arc;

use crate::backend::{ AmoOp, ReduceOp };
use crate::backend::type_width;
use crate::constants::WORK_GROUP_SIMULATED_ITEMS;
use crate::context::Context;
use crate::error::Result;
use crate::record::{ Op, RequestRecord, TypeCode };
use crate::ring::RequestRing;
use crate::workgroup;

/// Bound on the number of idle polls a blocking `wait_until` dispatch spins
/// for before giving up. The proxy loop is single-threaded, so a genuinely
/// stuck `wait_until` would otherwise starve every other request.
const WAIT_UNTIL_POLL_BUDGET: usize = 100_000;

/// Runs the proxy loop until [`Context::stop`] is called (typically from a
/// dispatched `Kill`). Performs a final non-blocking drain pass after the
/// stop flag is observed, so in-flight requests already published to the
/// ring are not abandoned.
pub fn run_loop(ctx: &Arc<Context>) {
    let mut next_receive: u32 = 0;
    while ctx.is_running() {
        if poll_and_dispatch(ctx, &mut next_receive) {
            continue;
        }
        ctx.wait_strategy.idle(ctx.running_flag());
    }
    while poll_and_dispatch(ctx, &mut next_receive) {}
}

/// Polls exactly one slot; dispatches and advances `next_receive` if ready.
/// Returns whether a record was found, so callers can busy-retry without
/// going through the wait strategy.
fn poll_and_dispatch(ctx: &Context, next_receive: &mut u32) -> bool {
    let Some(record) = ctx.ring.try_poll(*next_receive) else {
        return false;
    };
    if let Err(e) = dispatch(ctx, &record) {
        crate::insights::record_backend_error(&e.to_string());
        ctx.metrics.record_backend_error();
    }
    ctx.metrics.record_dispatched();
    *next_receive = next_receive.wrapping_add(1);
    if RequestRing::should_republish(*next_receive) {
        ctx.ring.republish_receive(*next_receive, &ctx.metrics);
    }
    true
}

/// Cooperatively re-stages `src` the way a work-group's member items would
/// before handing the buffer to the backend, exercising the per-item
/// offset/head/tail logic instead of a flat copy.
fn work_group_copy(src: &[u8]) -> Vec<u8> {
    let mut staged = vec![0u8; src.len()];
    workgroup::run_work_group_copy(&mut staged, src, WORK_GROUP_SIMULATED_ITEMS);
    staged
}

fn finish(ctx: &Context, record: &RequestRecord) {
    if !record.is_fire_and_forget() {
        ctx.completions.signal(record.completion - 1);
    }
    ctx.metrics.record_completion();
}

fn finish_with<T: Copy>(ctx: &Context, record: &RequestRecord, value: T) {
    if !record.is_fire_and_forget() {
        let slot = record.completion - 1;
        unsafe {
            ctx.completions.set_result(slot, value);
        }
        ctx.completions.signal(slot);
    }
    ctx.metrics.record_completion();
}

fn amo_op_for(op: Op) -> Option<AmoOp> {
    Some(match op {
        Op::AmoFetch => AmoOp::Fetch,
        Op::AmoSet => AmoOp::Set,
        Op::AmoSwap => AmoOp::Swap,
        Op::AmoFetchAdd => AmoOp::FetchAdd,
        Op::AmoAdd => AmoOp::Add,
        Op::AmoFetchAnd => AmoOp::FetchAnd,
        Op::AmoAnd => AmoOp::And,
        Op::AmoFetchOr => AmoOp::FetchOr,
        Op::AmoOr => AmoOp::Or,
        Op::AmoFetchXor => AmoOp::FetchXor,
        Op::AmoXor => AmoOp::Xor,
        Op::AmoFetchCswap => AmoOp::FetchCswap,
        Op::AmoCswap => AmoOp::Cswap,
        _ => {
            return None;
        }
    })
}

fn reduce_op_for(op: Op) -> Option<ReduceOp> {
    Some(match op {
        Op::AndReduce => ReduceOp::And,
        Op::OrReduce => ReduceOp::Or,
        Op::XorReduce => ReduceOp::Xor,
        Op::MaxReduce => ReduceOp::Max,
        Op::MinReduce => ReduceOp::Min,
        Op::SumReduce | Op::SumReduceWorkGroup => ReduceOp::Sum,
        Op::ProdReduce => ReduceOp::Prod,
        _ => {
            return None;
        }
    })
}

/// Dispatches a single request record to the backend and signals completion.
/// Errors are returned so the caller can record/log them, but never panic
/// the loop; a failed dispatch still signals completion (with a zeroed
/// result) so the waiting producer is not left spinning forever.
pub fn dispatch(ctx: &Context, record: &RequestRecord) -> Result<()> {
    crate::insights::record_dispatch(record.op()?, record.type_code()?);
    let op = record.op()?;
    let type_code = record.type_code()?;
    let width = type_width(type_code);
    let dest_pe = record.dest_pe as usize;
    let root = record.root as usize;
    let nelems = record.nelems as usize;

    let result = dispatch_inner(ctx, record, op, type_code, width, dest_pe, root, nelems);
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            finish(ctx, record);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_inner(
    ctx: &Context,
    record: &RequestRecord,
    op: Op,
    type_code: TypeCode,
    width: usize,
    dest_pe: usize,
    root: usize,
    nelems: usize
) -> Result<()> {
    match op {
        Op::Nop | Op::NopNoReturn => {
            finish(ctx, record);
        }

        Op::Put | Op::PutNbi => {
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(ctx.backend.my_pe(), ctx.heap_offset(record.src as usize), &mut buf)?;
            ctx.backend.put(dest_pe, ctx.heap_offset(record.dst as usize), &buf)?;
            finish(ctx, record);
        }

        Op::PutWorkGroup => {
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(ctx.backend.my_pe(), ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            ctx.backend.put(dest_pe, ctx.heap_offset(record.dst as usize), &staged)?;
            finish(ctx, record);
        }

        Op::Get | Op::GetNbi => {
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(dest_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            ctx.backend.put(ctx.backend.my_pe(), ctx.heap_offset(record.dst as usize), &buf)?;
            finish(ctx, record);
        }

        Op::GetWorkGroup => {
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(dest_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            ctx.backend.put(ctx.backend.my_pe(), ctx.heap_offset(record.dst as usize), &staged)?;
            finish(ctx, record);
        }

        Op::Iput | Op::Iget => {
            let dst_stride = record.dst_stride().max(1) as usize;
            let src_stride = record.src_stride().max(1) as usize;
            if op == Op::Iput {
                for i in 0..nelems {
                    let mut elem = vec![0u8; width];
                    ctx.backend.get(
                        ctx.backend.my_pe(),
                        ctx.heap_offset(record.src as usize) + i * src_stride * width,
                        &mut elem
                    )?;
                    ctx.backend.put(
                        dest_pe,
                        ctx.heap_offset(record.dst as usize) + i * dst_stride * width,
                        &elem
                    )?;
                }
            } else {
                for i in 0..nelems {
                    let mut elem = vec![0u8; width];
                    ctx.backend.get(
                        dest_pe,
                        ctx.heap_offset(record.src as usize) + i * src_stride * width,
                        &mut elem
                    )?;
                    ctx.backend.put(
                        ctx.backend.my_pe(),
                        ctx.heap_offset(record.dst as usize) + i * dst_stride * width,
                        &elem
                    )?;
                }
            }
            finish(ctx, record);
        }

        Op::P => {
            // Single-element put: the scalar travels in the record's value
            // union rather than through a local pointer.
            let bytes = record.value_u64().to_le_bytes();
            ctx.backend.put(dest_pe, ctx.heap_offset(record.dst as usize), &bytes[..width])?;
            finish(ctx, record);
        }

        Op::G => {
            let mut buf = vec![0u8; width];
            ctx.backend.get(dest_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            let mut padded = [0u8; 8];
            padded[..width].copy_from_slice(&buf);
            finish_with(ctx, record, u64::from_le_bytes(padded));
        }

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
        | Op::AmoCswap => {
            let amo_op = amo_op_for(op).expect("matched arm is one of the Amo* variants");
            let value = record.value_u64().to_le_bytes();
            let cond = record.cond_i64().to_le_bytes();
            let pre = ctx.backend.amo(
                dest_pe,
                ctx.heap_offset(record.dst as usize),
                amo_op,
                type_code,
                value,
                cond
            )?;
            finish_with(ctx, record, u64::from_le_bytes(pre));
        }

        Op::PutSignal | Op::PutSignalNbi => {
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(ctx.backend.my_pe(), ctx.heap_offset(record.src as usize), &mut buf)?;
            ctx.backend.put(dest_pe, ctx.heap_offset(record.dst as usize), &buf)?;
            let sig_op = if record.sig_op_i32() == 0 { AmoOp::Set } else { AmoOp::Add };
            ctx.backend.amo(
                dest_pe,
                ctx.heap_offset(record.sig_addr as usize),
                sig_op,
                TypeCode::U64,
                record.signal().to_le_bytes(),
                [0; 8]
            )?;
            finish(ctx, record);
        }

        Op::SignalFetch => {
            let pre = ctx.backend.amo(
                ctx.backend.my_pe(),
                ctx.heap_offset(record.sig_addr as usize),
                AmoOp::Fetch,
                TypeCode::U64,
                [0; 8],
                [0; 8]
            )?;
            finish_with(ctx, record, u64::from_le_bytes(pre));
        }

        Op::Test => {
            let mut buf = [0u8; 8];
            ctx.backend.get(
                ctx.backend.my_pe(),
                ctx.heap_offset(record.dst as usize),
                &mut buf[..width]
            )?;
            let observed = u64::from_le_bytes(buf);
            let satisfied = evaluate_condition(observed, record.cmp_i32(), record.value_u64());
            finish_with(ctx, record, satisfied as u64);
        }

        Op::WaitUntil => {
            let mut satisfied = false;
            for _ in 0..WAIT_UNTIL_POLL_BUDGET {
                let mut buf = [0u8; 8];
                ctx.backend.get(
                    ctx.backend.my_pe(),
                    ctx.heap_offset(record.dst as usize),
                    &mut buf[..width]
                )?;
                let observed = u64::from_le_bytes(buf);
                if evaluate_condition(observed, record.cmp_i32(), record.value_u64()) {
                    satisfied = true;
                    break;
                }
                std::hint::spin_loop();
            }
            if !satisfied {
                return Err(crate::error::ProxyError::Timeout);
            }
            finish(ctx, record);
        }

        Op::Fence | Op::Quiet => {
            // This crate tracks no outstanding non-blocking operations
            // separately from the ring itself; by the time a record is
            // dispatched, every record before it has already completed.
            finish(ctx, record);
        }

        Op::BarrierAll | Op::SyncAll => {
            ctx.backend.sync()?;
            finish(ctx, record);
        }

        Op::Broadcast => {
            let size = nelems * width;
            let mut buf = vec![0u8; size];
            ctx.backend.get(root, ctx.heap_offset(record.src as usize), &mut buf)?;
            for pe in 0..ctx.backend.n_pes() {
                ctx.backend.put(pe, ctx.heap_offset(record.dst as usize), &buf)?;
            }
            finish(ctx, record);
        }

        Op::BroadcastWorkGroup => {
            let size = nelems * width;
            let mut buf = vec![0u8; size];
            ctx.backend.get(root, ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            for pe in 0..ctx.backend.n_pes() {
                ctx.backend.put(pe, ctx.heap_offset(record.dst as usize), &staged)?;
            }
            finish(ctx, record);
        }

        Op::Alltoall => {
            ctx.backend.alltoall(
                ctx.heap_offset(record.dst as usize),
                ctx.heap_offset(record.src as usize),
                nelems * width
            )?;
            finish(ctx, record);
        }

        Op::AlltoallWorkGroup => {
            let chunk = nelems * width;
            let my_pe = ctx.backend.my_pe();
            let mut buf = vec![0u8; chunk];
            ctx.backend.get(my_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            ctx.backend.put(my_pe, ctx.heap_offset(record.src as usize), &staged)?;
            ctx.backend.alltoall(ctx.heap_offset(record.dst as usize), ctx.heap_offset(record.src as usize), chunk)?;
            finish(ctx, record);
        }

        Op::Collect | Op::Fcollect => {
            ctx.backend.fcollect(
                ctx.heap_offset(record.dst as usize),
                ctx.heap_offset(record.src as usize),
                nelems * width
            )?;
            finish(ctx, record);
        }

        Op::FcollectWorkGroup => {
            let chunk = nelems * width;
            let my_pe = ctx.backend.my_pe();
            let mut buf = vec![0u8; chunk];
            ctx.backend.get(my_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            ctx.backend.put(my_pe, ctx.heap_offset(record.src as usize), &staged)?;
            ctx.backend.fcollect(ctx.heap_offset(record.dst as usize), ctx.heap_offset(record.src as usize), chunk)?;
            finish(ctx, record);
        }

        Op::AndReduce
        | Op::OrReduce
        | Op::XorReduce
        | Op::MaxReduce
        | Op::MinReduce
        | Op::SumReduce
        | Op::ProdReduce => {
            let reduce_op = reduce_op_for(op).expect("matched arm is one of the *Reduce variants");
            ctx.backend.reduce(
                reduce_op,
                type_code,
                ctx.heap_offset(record.dst as usize),
                ctx.heap_offset(record.src as usize),
                nelems
            )?;
            finish(ctx, record);
        }

        Op::SumReduceWorkGroup => {
            let my_pe = ctx.backend.my_pe();
            let mut buf = vec![0u8; nelems * width];
            ctx.backend.get(my_pe, ctx.heap_offset(record.src as usize), &mut buf)?;
            let staged = work_group_copy(&buf);
            ctx.backend.put(my_pe, ctx.heap_offset(record.src as usize), &staged)?;
            let reduce_op = reduce_op_for(op).expect("matched arm is one of the *Reduce variants");
            ctx.backend.reduce(
                reduce_op,
                type_code,
                ctx.heap_offset(record.dst as usize),
                ctx.heap_offset(record.src as usize),
                nelems
            )?;
            finish(ctx, record);
        }

        Op::Kill => {
            finish(ctx, record);
            ctx.stop();
        }

        Op::Timestamp => {
            finish_with(ctx, record, 0u64);
        }

        Op::Print | Op::DebugTest => {
            let message = ctx.messages.read(record.src as u16);
            crate::insights::record_print(&message);
            finish(ctx, record);
        }
    }
    Ok(())
}

fn evaluate_condition(observed: u64, comparator: i32, expected: u64) -> bool {
    match comparator {
        0 => observed == expected,
        1 => observed != expected,
        2 => observed > expected,
        3 => observed >= expected,
        4 => observed < expected,
        5 => observed <= expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ LoopbackBackend, World };
    use crate::config::Config;
    use crate::issue::{ issue_blocking_void, issue_nonblocking };
    use crate::record::{ Op, TypeCode };
    use std::sync::Arc;

    fn make_context() -> Arc<Context> {
        let world = World::new(2, 65536);
        let backend = Arc::new(LoopbackBackend::new(world, 0));
        Context::init(Config::default(), backend).unwrap()
    }

    fn spawn_loop(ctx: &Arc<Context>) -> std::thread::JoinHandle<()> {
        let ctx = ctx.clone();
        std::thread::spawn(move || run_loop(&ctx))
    }

    #[test]
    fn put_then_get_round_trip() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);

        let base = ctx.heap.heap_base();
        let src_bytes = 99u64.to_le_bytes();
        ctx.backend.put(ctx.backend.my_pe(), ctx.heap_offset(base + 0x100), &src_bytes).unwrap();

        let mut rec = RequestRecord::new(Op::Put, TypeCode::U64);
        rec.dest_pe = 1;
        rec.src = (base + 0x100) as u64;
        rec.dst = (base + 0x200) as u64;
        rec.nelems = 1;
        issue_blocking_void(&ctx, rec).unwrap();

        let mut got = [0u8; 8];
        ctx.backend.get(1, ctx.heap_offset(base + 0x200), &mut got).unwrap();
        assert_eq!(u64::from_le_bytes(got), 99);

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        kill.dest_pe = 0;
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn atomic_fetch_add_twice_accumulates() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);
        let base = ctx.heap.heap_base();
        ctx.backend.put(0, ctx.heap_offset(base), &0u64.to_le_bytes()).unwrap();

        for _ in 0..2 {
            let mut rec = RequestRecord::new(Op::AmoFetchAdd, TypeCode::U64);
            rec.dest_pe = 0;
            rec.dst = base as u64;
            rec.set_value_u64(5);
            let pre: u64 = unsafe { crate::issue::issue_blocking_value(&ctx, rec).unwrap() };
            let _ = pre;
        }

        let mut got = [0u8; 8];
        ctx.backend.get(0, ctx.heap_offset(base), &mut got).unwrap();
        assert_eq!(u64::from_le_bytes(got), 10);

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn compare_swap_changes_only_on_match() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);
        let base = ctx.heap.heap_base();
        ctx.backend.put(0, ctx.heap_offset(base), &1i32.to_le_bytes()).unwrap();

        let mut rec = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I32);
        rec.dest_pe = 0;
        rec.dst = base as u64;
        rec.set_cond_i64(1);
        rec.set_value_u64(2);
        let pre: u64 = unsafe { crate::issue::issue_blocking_value(&ctx, rec).unwrap() };
        assert_eq!(pre as i32, 1);

        let mut rec2 = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I32);
        rec2.dest_pe = 0;
        rec2.dst = base as u64;
        rec2.set_cond_i64(1);
        rec2.set_value_u64(3);
        let pre2: u64 = unsafe { crate::issue::issue_blocking_value(&ctx, rec2).unwrap() };
        assert_eq!(pre2 as i32, 2);

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn broadcast_reaches_every_pe() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);
        let base = ctx.heap.heap_base();
        ctx.backend.put(0, ctx.heap_offset(base), &77u32.to_le_bytes()).unwrap();

        let mut rec = RequestRecord::new(Op::Broadcast, TypeCode::U32);
        rec.root = 0;
        rec.src = base as u64;
        rec.dst = (base + 0x1000) as u64;
        rec.nelems = 1;
        issue_blocking_void(&ctx, rec).unwrap();

        for pe in 0..2 {
            let mut got = [0u8; 4];
            ctx.backend.get(pe, ctx.heap_offset(base + 0x1000), &mut got).unwrap();
            assert_eq!(u32::from_le_bytes(got), 77);
        }

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn sum_reduce_combines_every_pe() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);
        let base = ctx.heap.heap_base();
        ctx.backend.put(0, ctx.heap_offset(base), &3i32.to_le_bytes()).unwrap();
        ctx.backend.put(1, ctx.heap_offset(base), &4i32.to_le_bytes()).unwrap();

        let mut rec = RequestRecord::new(Op::SumReduce, TypeCode::Int);
        rec.src = base as u64;
        rec.dst = (base + 0x1000) as u64;
        rec.nelems = 1;
        issue_blocking_void(&ctx, rec).unwrap();

        for pe in 0..2 {
            let mut got = [0u8; 4];
            ctx.backend.get(pe, ctx.heap_offset(base + 0x1000), &mut got).unwrap();
            assert_eq!(i32::from_le_bytes(got), 7);
        }

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn put_nbi_then_get_observes_prior_write_after_quiet() {
        let ctx = make_context();
        let handle = spawn_loop(&ctx);
        let base = ctx.heap.heap_base();
        ctx.backend.put(0, ctx.heap_offset(base), &55u64.to_le_bytes()).unwrap();

        let mut put_nbi = RequestRecord::new(Op::PutNbi, TypeCode::U64);
        put_nbi.dest_pe = 1;
        put_nbi.src = base as u64;
        put_nbi.dst = (base + 0x2000) as u64;
        put_nbi.nelems = 1;
        issue_nonblocking(&ctx, put_nbi).unwrap();

        let mut quiet = RequestRecord::new(Op::Quiet, TypeCode::Mem);
        issue_blocking_void(&ctx, quiet).unwrap();

        let mut rec = RequestRecord::new(Op::Get, TypeCode::U64);
        rec.dest_pe = 1;
        rec.src = (base + 0x2000) as u64;
        rec.dst = (base + 0x2100) as u64;
        rec.nelems = 1;
        issue_blocking_void(&ctx, rec).unwrap();

        let mut got = [0u8; 8];
        ctx.backend.get(0, ctx.heap_offset(base + 0x2100), &mut got).unwrap();
        assert_eq!(u64::from_le_bytes(got), 55);

        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(&ctx, kill).unwrap();
        handle.join().unwrap();
    }
}
