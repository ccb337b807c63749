use criterion::{black_box, Criterion};
use scorep_core::substrates::*;
use std::sync::atomic::{AtomicU64, Ordering};

static SEEN: AtomicU64 = AtomicU64::new(0);

fn record(data: &EventData<'_>) {
    SEEN.fetch_add(data.timestamp, Ordering::Relaxed);
}

fn noop(_: &MgmtData<'_>) {}

fn substrate(name: &'static str) -> BuiltinSubstrate {
    BuiltinSubstrate::new(name)
        .with_mgmt(MgmtEvent::InitSubstrate, noop)
        .with_mgmt(MgmtEvent::FinalizeSubstrate, noop)
        .with_event(RecordingMode::Enabled, SubstrateEvent::EnterRegion, record)
        .with_event(RecordingMode::Enabled, SubstrateEvent::ExitRegion, record)
}

pub fn bench(c: &mut Criterion) {
    let tracing = substrate("tracing");
    let profiling = substrate("profiling");

    let one = Substrates::early_initialize(Some(&tracing), None, vec![]);
    let two = Substrates::early_initialize(Some(&tracing), Some(&profiling), vec![]);
    let enter = EventData::new(SubstrateEvent::EnterRegion, 0, 1).with_args(EventArgs::Region(1));

    c.bench_function("dispatch_one_substrate", |b| {
        b.iter(|| one.dispatch(black_box(&enter)))
    });
    c.bench_function("dispatch_two_substrates", |b| {
        b.iter(|| two.dispatch(black_box(&enter)))
    });
    c.bench_function("dispatch_no_listener", |b| {
        let event = EventData::new(SubstrateEvent::Sample, 0, 1);
        b.iter(|| two.dispatch(black_box(&event)))
    });

    two.disable_recording();
    c.bench_function("dispatch_disabled", |b| {
        b.iter(|| two.dispatch(black_box(&enter)))
    });
    two.enable_recording();
}
