use criterion::{black_box, Criterion};
use scorep_core::allocator::{Allocator, AllocatorGuard, NullGuard, SpinGuard};

const ALLOCATIONS: usize = 64;

fn bench_guard<G: AllocatorGuard>(c: &mut Criterion, name: &str, guard: G) {
    let Some(allocator) = Allocator::new(1 << 24, 8192, guard) else {
        panic!("cannot create the allocator");
    };
    let Some(mut pm) = allocator.create_page_manager() else {
        panic!("cannot create a page manager");
    };

    c.bench_function(&format!("alloc_small_{}", name), |b| {
        b.iter(|| {
            for _ in 0..ALLOCATIONS {
                black_box(pm.alloc(black_box(48)));
            }
            pm.free();
        })
    });

    c.bench_function(&format!("alloc_movable_{}", name), |b| {
        b.iter(|| {
            for _ in 0..ALLOCATIONS {
                if let Some(memory) = pm.alloc_movable(black_box(48)) {
                    black_box(pm.get_address_from_movable_memory(memory));
                }
            }
            pm.free();
        })
    });

    c.bench_function(&format!("alloc_multi_page_{}", name), |b| {
        b.iter(|| {
            black_box(pm.alloc(black_box(3 * 8192)));
            pm.free();
        })
    });
}

pub fn bench(c: &mut Criterion) {
    bench_guard(c, "unguarded", NullGuard::new());
    bench_guard(c, "spin", SpinGuard::new());
}
