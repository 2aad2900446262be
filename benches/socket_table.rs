//! Socket table and command dispatch benchmarks.
//!
//! Benchmarks the table's hot paths at different capacities:
//! - Open/close churn with recency reselection
//! - Command execution through the modem facade
//!
//! Run with: cargo bench --bench socket_table
//! Results saved to: target/criterion/

use std::hint::black_box;

use cellsock::socket::SocketTable;
use cellsock::{Command, Config, Modem, SocketId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CAPACITIES: &[usize] = &[8, 64, 512];

// ============================================================================
// Benchmark: Table Churn
// ============================================================================

fn bench_table_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_churn");

    for &capacity in CAPACITIES {
        group.bench_with_input(
            BenchmarkId::new("fill_then_close_current", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut table = SocketTable::new(capacity);
                    while let Ok(slot) = table.allocate() {
                        table.fill(slot, SocketId::next(), ());
                    }
                    while let Some(id) = table.current() {
                        black_box(table.remove(id));
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Command Dispatch
// ============================================================================

fn bench_open_close_commands(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let open = Command::from_json(r#"{"op":"open","type":"datagram","role":"client"}"#)
        .expect("open command");

    let mut group = c.benchmark_group("command_dispatch");

    for &capacity in CAPACITIES {
        group.bench_with_input(
            BenchmarkId::new("open_close", capacity),
            &capacity,
            |b, &capacity| {
                b.to_async(&rt).iter(|| {
                    let open = open.clone();
                    async move {
                        let (mut modem, _notifications) = Modem::builder()
                            .config(Config::new().with_socket_capacity(capacity))
                            .build()
                            .expect("build");
                        for _ in 0..capacity.min(16) {
                            black_box(modem.execute(open.clone()).await.expect("open"));
                        }
                        while modem.sockets().current().is_some() {
                            black_box(
                                modem
                                    .execute(Command::Close { id: None })
                                    .await
                                    .expect("close"),
                            );
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_table_churn, bench_open_close_commands);
criterion_main!(benches);
