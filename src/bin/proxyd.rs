//! Stand-alone demo: brings up a loopback `World` of PEs, runs one proxy
//! loop per PE, and issues a handful of requests from producer threads while
//! periodically printing a metrics snapshot.
//!
//! ```text
//! proxyd [--pes N] [--requests N]
//! ```

use std::sync::Arc;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::time::Duration;

use shmem_proxy::backend::{ LoopbackBackend, World };
use shmem_proxy::config::Config;
use shmem_proxy::context::Context;
use shmem_proxy::issue::issue_blocking_void;
use shmem_proxy::proxy;
use shmem_proxy::record::{ Op, RequestRecord, TypeCode };

struct Args {
    n_pes: usize,
    requests_per_pe: usize,
}

fn parse_args() -> Args {
    let mut n_pes = 2;
    let mut requests_per_pe = 1000;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pes" => {
                if let Some(v) = args.next() {
                    n_pes = v.parse().unwrap_or(n_pes);
                }
            }
            "--requests" => {
                if let Some(v) = args.next() {
                    requests_per_pe = v.parse().unwrap_or(requests_per_pe);
                }
            }
            other => {
                eprintln!("unrecognized argument: {other}");
            }
        }
    }
    Args { n_pes, requests_per_pe }
}

fn main() -> anyhow::Result<()> {
    shmem_proxy::insights::init_diagnostics();
    let args = parse_args();

    let world = World::new(args.n_pes, 1 << 20);
    let mut contexts = Vec::with_capacity(args.n_pes);
    for pe in 0..args.n_pes {
        let backend = Arc::new(LoopbackBackend::new(world.clone(), pe));
        contexts.push(Context::init(Config::from_env()?, backend)?);
    }

    let mut proxy_threads = Vec::new();
    for ctx in &contexts {
        let ctx = ctx.clone();
        proxy_threads.push(std::thread::spawn(move || proxy::run_loop(&ctx)));
    }

    let total_sent = Arc::new(AtomicU64::new(0));
    let mut producers = Vec::new();
    for (pe, ctx) in contexts.iter().enumerate() {
        let ctx = ctx.clone();
        let total_sent = total_sent.clone();
        let n_pes = args.n_pes;
        let requests = args.requests_per_pe;
        producers.push(
            std::thread::spawn(move || {
                let base = ctx.heap.heap_base();
                for i in 0..requests {
                    let mut rec = RequestRecord::new(Op::AmoFetchAdd, TypeCode::U64);
                    rec.dest_pe = ((pe + 1) % n_pes) as i32;
                    rec.dst = base as u64;
                    rec.set_value_u64(1);
                    let _ = issue_blocking_void(&ctx, rec);
                    if i % 4096 == 0 {
                        total_sent.fetch_add(4096, Ordering::Relaxed);
                    }
                }
            })
        );
    }

    for p in producers {
        p.join().expect("producer thread panicked");
    }

    for ctx in &contexts {
        let mut kill = RequestRecord::new(Op::Kill, TypeCode::Mem);
        issue_blocking_void(ctx, kill).ok();
    }
    for t in proxy_threads {
        t.join().expect("proxy thread panicked");
    }

    std::thread::sleep(Duration::from_millis(10));
    for (pe, ctx) in contexts.iter().enumerate() {
        println!("pe {pe}: {}", ctx.metrics.snapshot());
        ctx.finalize()?;
    }

    Ok(())
}
