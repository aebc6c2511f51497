use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Map, Value, json};
use tether_client::transport::MemoryTransport;
use tether_client::{ConnectionPhase, Observers, SessionManager};

/// Object payload with `fields` random entries
fn gen_payload(fields: usize, rng: &mut StdRng) -> Value {
    let mut map = Map::with_capacity(fields);
    for i in 0..fields {
        let value = if rng.gen_bool(0.5) {
            json!(rng.gen_range(0..1_000_000))
        } else {
            json!(format!("value-{}", rng.gen_range(0..1_000)))
        };
        map.insert(format!("field_{i}"), value);
    }
    Value::Object(map)
}

fn bench_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("inbound_dispatch");

    let sizes = [1, 16, 256];
    let subscriber_counts = [0, 4];

    for &subscribers in &subscriber_counts {
        let transport = MemoryTransport::new();
        let session = SessionManager::builder("http://localhost:8080")
            .credential("bench-token")
            .transport(transport.clone())
            .runtime(runtime.handle().clone())
            .observers(Observers::new().on_message(|event, args| {
                black_box((event, args.len()));
            }))
            .build()
            .unwrap();
        for _ in 0..subscribers {
            session.subscribe_any(|event, _| {
                black_box(event);
            });
        }

        session.connect().unwrap();
        let handle = transport.last_handle().unwrap();
        handle.accept();
        assert_eq!(session.status(), ConnectionPhase::Connected);

        for &fields in &sizes {
            let mut rng = StdRng::seed_from_u64(fields as u64);
            let args = vec![gen_payload(fields, &mut rng)];

            group.bench_with_input(
                BenchmarkId::new(format!("subscribers_{subscribers}"), fields),
                &args,
                |b, args| {
                    b.iter_batched(
                        || args.clone(),
                        |args| handle.receive("notification", args),
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
