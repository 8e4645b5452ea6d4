use criterion::{ black_box, criterion_group, criterion_main, Criterion };
use shmem_proxy::metrics::Metrics;
use shmem_proxy::ring::RequestRing;
use shmem_proxy::record::{ Op, RequestRecord, TypeCode };

fn bench_send(c: &mut Criterion) {
    let ring = RequestRing::new().unwrap();
    let metrics = Metrics::new();
    c.bench_function("ring_send", |b| {
        b.iter(|| {
            let rec = RequestRecord::new(Op::Nop, TypeCode::Mem);
            black_box(ring.send(rec, &metrics));
        });
    });
}

fn bench_send_then_poll(c: &mut Criterion) {
    let ring = RequestRing::new().unwrap();
    let metrics = Metrics::new();
    let mut next = 0u32;
    c.bench_function("ring_send_then_poll", |b| {
        b.iter(|| {
            let rec = RequestRecord::new(Op::Put, TypeCode::U64);
            ring.send(rec, &metrics);
            while ring.try_poll(next).is_none() {
                std::hint::spin_loop();
            }
            next = next.wrapping_add(1);
            if RequestRing::should_republish(next) {
                ring.republish_receive(next, &metrics);
            }
        });
    });
}

criterion_group!(benches, bench_send, bench_send_then_poll);
criterion_main!(benches);
