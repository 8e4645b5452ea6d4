//! Runs the six canonical two-PE scenarios against a loopback backend and
//! prints the observed results: put+quiet, fetch-add twice, compare-swap
//! twice, broadcast, sum-reduce, and put_nbi+get ordering.

use std::sync::Arc;

use shmem_proxy::backend::{ LoopbackBackend, World };
use shmem_proxy::config::Config;
use shmem_proxy::context::Context;
use shmem_proxy::issue::{ issue_blocking_value, issue_blocking_void, issue_nonblocking };
use shmem_proxy::proxy;
use shmem_proxy::record::{ Op, RequestRecord, TypeCode };

fn main() -> anyhow::Result<()> {
    let world = World::new(2, 1 << 16);
    let pe0 = Context::init(Config::default(), Arc::new(LoopbackBackend::new(world.clone(), 0)))?;
    let pe1 = Context::init(Config::default(), Arc::new(LoopbackBackend::new(world.clone(), 1)))?;

    let t0 = {
        let pe0 = pe0.clone();
        std::thread::spawn(move || proxy::run_loop(&pe0))
    };
    let t1 = {
        let pe1 = pe1.clone();
        std::thread::spawn(move || proxy::run_loop(&pe1))
    };

    let base = pe0.heap.heap_base();

    // put + quiet
    pe0.backend.put(0, pe0.heap_offset(base), &123u64.to_le_bytes())?;
    let mut put = RequestRecord::new(Op::Put, TypeCode::U64);
    put.dest_pe = 1;
    put.src = base as u64;
    put.dst = base as u64;
    put.nelems = 1;
    issue_blocking_void(&pe0, put)?;
    let mut quiet = RequestRecord::new(Op::Quiet, TypeCode::Mem);
    issue_blocking_void(&pe0, quiet)?;
    let mut observed = [0u8; 8];
    pe1.backend.get(1, pe1.heap_offset(base), &mut observed)?;
    println!("put+quiet: pe1 observes {}", u64::from_le_bytes(observed));

    // fetch-add twice
    pe1.backend.put(1, pe1.heap_offset(base + 0x100), &0u64.to_le_bytes())?;
    for _ in 0..2 {
        let mut rec = RequestRecord::new(Op::AmoFetchAdd, TypeCode::U64);
        rec.dest_pe = 1;
        rec.dst = (base + 0x100) as u64;
        rec.set_value_u64(10);
        let _: u64 = unsafe { issue_blocking_value(&pe0, rec)? };
    }
    let mut sum = [0u8; 8];
    pe1.backend.get(1, pe1.heap_offset(base + 0x100), &mut sum)?;
    println!("fetch_add x2: {}", u64::from_le_bytes(sum));

    // compare-swap twice: first swap matches the condition and takes effect,
    // second does not
    pe1.backend.put(1, pe1.heap_offset(base + 0x140), &1i32.to_le_bytes())?;
    let mut cswap1 = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I32);
    cswap1.dest_pe = 1;
    cswap1.dst = (base + 0x140) as u64;
    cswap1.set_cond_i64(1);
    cswap1.set_value_u64(2);
    let pre1: u64 = unsafe { issue_blocking_value(&pe0, cswap1)? };
    let mut cswap2 = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I32);
    cswap2.dest_pe = 1;
    cswap2.dst = (base + 0x140) as u64;
    cswap2.set_cond_i64(1);
    cswap2.set_value_u64(3);
    let pre2: u64 = unsafe { issue_blocking_value(&pe0, cswap2)? };
    println!("compare_swap x2: observed {} then {}", pre1 as i32, pre2 as i32);

    // broadcast
    pe0.backend.put(0, pe0.heap_offset(base + 0x180), &77u32.to_le_bytes())?;
    let mut bcast = RequestRecord::new(Op::Broadcast, TypeCode::U32);
    bcast.root = 0;
    bcast.src = (base + 0x180) as u64;
    bcast.dst = (base + 0x1c0) as u64;
    bcast.nelems = 1;
    issue_blocking_void(&pe0, bcast)?;
    let mut observed_bcast = [0u8; 4];
    pe1.backend.get(1, pe1.heap_offset(base + 0x1c0), &mut observed_bcast)?;
    println!("broadcast: pe1 observes {}", u32::from_le_bytes(observed_bcast));

    // sum reduce
    pe0.backend.put(0, pe0.heap_offset(base + 0x200), &3i32.to_le_bytes())?;
    pe1.backend.put(1, pe1.heap_offset(base + 0x200), &4i32.to_le_bytes())?;
    let mut reduce = RequestRecord::new(Op::SumReduce, TypeCode::Int);
    reduce.src = (base + 0x200) as u64;
    reduce.dst = (base + 0x300) as u64;
    reduce.nelems = 1;
    issue_blocking_void(&pe0, reduce)?;
    let mut reduced = [0u8; 4];
    pe1.backend.get(1, pe1.heap_offset(base + 0x300), &mut reduced)?;
    println!("sum_reduce: {}", i32::from_le_bytes(reduced));

    // put_nbi then get, ordered by an intervening quiet
    pe0.backend.put(0, pe0.heap_offset(base + 0x400), &55u64.to_le_bytes())?;
    let mut put_nbi = RequestRecord::new(Op::PutNbi, TypeCode::U64);
    put_nbi.dest_pe = 1;
    put_nbi.src = (base + 0x400) as u64;
    put_nbi.dst = (base + 0x500) as u64;
    put_nbi.nelems = 1;
    issue_nonblocking(&pe0, put_nbi)?;
    let mut quiet2 = RequestRecord::new(Op::Quiet, TypeCode::Mem);
    issue_blocking_void(&pe0, quiet2)?;
    let mut get = RequestRecord::new(Op::Get, TypeCode::U64);
    get.dest_pe = 1;
    get.src = (base + 0x500) as u64;
    get.dst = (base + 0x600) as u64;
    get.nelems = 1;
    issue_blocking_void(&pe0, get)?;
    let mut got = [0u8; 8];
    pe0.backend.get(0, pe0.heap_offset(base + 0x600), &mut got)?;
    println!("put_nbi+quiet+get: {}", u64::from_le_bytes(got));

    for ctx in [&pe0, &pe1] {
        let kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(ctx, kill)?;
    }
    t0.join().expect("pe0 proxy thread panicked");
    t1.join().expect("pe1 proxy thread panicked");

    Ok(())
}
