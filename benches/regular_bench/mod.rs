pub mod alloc;
pub mod dispatch;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    alloc::bench(c);
    dispatch::bench(c);
}
