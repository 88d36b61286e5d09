// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Benchmarks for the commission ledger.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Fee computation and eligibility evaluation
//! - Single-threaded trip settlement throughput
//! - Multi-threaded settlement across drivers
//! - Notification fan-out to driver sessions

use chrono::Utc;
use commission_ledger::{
    AttemptId, Currency, DebtThreshold, DriverId, LedgerStore, Region, TripId, TripSettlement,
    VerificationStatus, compute_fee, evaluate,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rust_decimal::Decimal;
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

// =============================================================================
// Helper Functions
// =============================================================================

fn make_trip(driver: u32, trip_id: u64, fare_cents: i64) -> TripSettlement {
    TripSettlement::new(
        TripId(trip_id),
        DriverId(driver),
        Decimal::new(fare_cents, 2),
        Decimal::new(6, 2),
        Currency::Zar,
        Utc::now(),
    )
    .unwrap()
}

fn store_with(drivers: u32) -> LedgerStore {
    let store = LedgerStore::new();
    for driver in 1..=drivers {
        store
            .register(DriverId(driver), Currency::Zar, Region::new("ZA"))
            .unwrap();
    }
    store
}

// =============================================================================
// Pure Function Benchmarks
// =============================================================================

fn bench_compute_fee(c: &mut Criterion) {
    c.bench_function("compute_fee", |b| {
        b.iter(|| {
            compute_fee(
                black_box(Decimal::new(42_000, 2)),
                black_box(Decimal::new(6, 2)),
                Currency::Zar,
            )
            .unwrap()
        })
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let threshold = DebtThreshold::new(Decimal::new(50, 0));
    c.bench_function("evaluate", |b| {
        b.iter(|| {
            evaluate(
                black_box(Decimal::new(4_520, 2)),
                &threshold,
                black_box(VerificationStatus::Verified),
            )
        })
    });
}

// =============================================================================
// Settlement Benchmarks
// =============================================================================

fn bench_trip_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("trip_throughput");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let store = store_with(1);
                for i in 0..count {
                    store.record_trip(make_trip(1, i as u64, 42_000)).unwrap();
                }
                black_box(&store);
            })
        });
    }
    group.finish();
}

fn bench_trips_and_payments(c: &mut Criterion) {
    let mut group = c.benchmark_group("trips_and_payments");

    for count in [100, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let store = store_with(1);
                for i in 0..count {
                    store.record_trip(make_trip(1, i as u64, 42_000)).unwrap();
                    store
                        .settle_payment(DriverId(1), AttemptId::new(), Decimal::new(1_000, 2))
                        .unwrap();
                }
                black_box(&store);
            })
        });
    }
    group.finish();
}

// =============================================================================
// Concurrency Benchmarks
// =============================================================================

fn bench_parallel_drivers(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_drivers");
    const TRIPS_PER_DRIVER: u64 = 250;

    for drivers in [1u32, 4, 16].iter() {
        group.throughput(Throughput::Elements(*drivers as u64 * TRIPS_PER_DRIVER));
        group.bench_with_input(BenchmarkId::from_parameter(drivers), drivers, |b, &drivers| {
            b.iter(|| {
                let store = Arc::new(store_with(drivers));
                let trip_ids = Arc::new(AtomicU64::new(0));
                let handles: Vec<_> = (1..=drivers)
                    .map(|driver| {
                        let store = store.clone();
                        let trip_ids = trip_ids.clone();
                        thread::spawn(move || {
                            for _ in 0..TRIPS_PER_DRIVER {
                                let trip_id = trip_ids.fetch_add(1, Ordering::Relaxed);
                                store.record_trip(make_trip(driver, trip_id, 42_000)).unwrap();
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(&store);
            })
        });
    }
    group.finish();
}

fn bench_notification_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("notification_fanout");

    for sessions in [1usize, 8, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(sessions), sessions, |b, &sessions| {
            let store = store_with(1);
            let subscriptions: Vec<_> = (0..sessions).map(|_| store.subscribe(DriverId(1))).collect();
            let mut trip_id = 0u64;
            b.iter(|| {
                store.record_trip(make_trip(1, trip_id, 100)).unwrap();
                trip_id += 1;
                for subscription in &subscriptions {
                    black_box(subscription.drain());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_compute_fee,
    bench_evaluate,
    bench_trip_throughput,
    bench_trips_and_payments,
    bench_parallel_drivers,
    bench_notification_fanout,
);
criterion_main!(benches);
