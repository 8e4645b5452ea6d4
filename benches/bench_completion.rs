use criterion::{ black_box, criterion_group, criterion_main, Criterion };
use shmem_proxy::completion::CompletionTable;

fn bench_allocate_free(c: &mut Criterion) {
    let table = CompletionTable::with_default_capacity();
    c.bench_function("completion_allocate_free", |b| {
        b.iter(|| {
            let slot = table.allocate();
            unsafe {
                table.set_result(slot, 1u64);
            }
            table.signal(slot);
            table.wait(slot);
            let v: u64 = unsafe { table.result(slot) };
            black_box(v);
            table.free(slot);
        });
    });
}

fn bench_allocate_under_contention(c: &mut Criterion) {
    use std::sync::Arc;

    let table = Arc::new(CompletionTable::with_default_capacity());
    c.bench_function("completion_allocate_under_contention", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let table = table.clone();
                    std::thread::spawn(move || {
                        let slot = table.allocate();
                        table.signal(slot);
                        table.wait(slot);
                        table.free(slot);
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_allocate_free, bench_allocate_under_contention);
criterion_main!(benches);
