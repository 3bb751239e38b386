use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gateledger::core::assets::LEDGER_TEMPLATE;
use gateledger::core::ledger::{Gate, Hop, LedgerDocument};
use gateledger::core::retry::RetryState;
use gateledger::core::routing::RoutingDecision;
use gateledger::core::status::GateStatus;

/// A ledger with `gates` rows and `hops` hoplog lines.
fn busy_ledger(gates: usize, hops: usize) -> LedgerDocument {
    let mut doc = LedgerDocument::parse(LEDGER_TEMPLATE).unwrap();
    for i in 0..gates {
        let gate = Gate::new(&format!("gate-{i}"), GateStatus::Fail, "exit: 1; tail: boom").unwrap();
        doc = doc.with_gate(gate);
    }
    let retry = RoutingDecision::Next("self".to_string());
    for i in 0..hops {
        doc = doc.with_hop(Hop::tagged(
            &format!("{}Z", 1_700_000_000 + i),
            "tests-runner",
            "gate tests fail",
            "tests",
            &retry,
        ));
    }
    doc
}

fn bench_parse_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_parse_render");
    for hops in [10usize, 100, 1000] {
        let body = busy_ledger(12, hops).render();
        group.bench_with_input(BenchmarkId::new("parse", hops), &body, |b, body| {
            b.iter(|| LedgerDocument::parse(black_box(body)).unwrap());
        });
        let doc = LedgerDocument::parse(&body).unwrap();
        group.bench_with_input(BenchmarkId::new("render", hops), &doc, |b, doc| {
            b.iter(|| black_box(doc.render()));
        });
    }
    group.finish();
}

fn bench_upsert(c: &mut Criterion) {
    let doc = busy_ledger(40, 200);
    c.bench_function("ledger_upsert_existing_gate", |b| {
        b.iter(|| {
            let gate = Gate::new("gate-20", GateStatus::Pass, "exit: 0").unwrap();
            black_box(doc.with_gate(gate))
        });
    });
}

fn bench_retry_replay(c: &mut Criterion) {
    let doc = busy_ledger(1, 1000);
    c.bench_function("retry_replay_1000_hops", |b| {
        b.iter(|| black_box(RetryState::load("tests-runner", "tests", doc.hops(), 8)));
    });
}

criterion_group!(benches, bench_parse_render, bench_upsert, bench_retry_replay);
criterion_main!(benches);
