//! Coordinator request benchmarks

use std::sync::Arc;

use bytes::Bytes;
use criterion::Criterion;
use mediafetch::{
    requester_fn, Coordinator, CoordinatorConfig, MemoryCache, ResourceKey, Scheduler,
    TransportError,
};

fn coordinator() -> Coordinator {
    let transport = |key: ResourceKey| async move {
        Ok::<_, TransportError>(Bytes::from(key.as_str().to_owned()))
    };
    Coordinator::new(
        CoordinatorConfig::default(),
        Arc::new(transport),
        Arc::new(MemoryCache::new()),
        Scheduler::new(|fut| {
            tokio::spawn(fut);
        }),
    )
}

pub fn bench_requests(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("request_cache_hit", |b| {
        let coordinator = rt.block_on(async { coordinator() });
        coordinator
            .cache()
            .store("hit.png".into(), Bytes::from_static(b"payload"));

        b.iter(|| {
            coordinator.request("hit.png", requester_fn(|| true, |_: &ResourceKey, _: Bytes| {}))
        });
    });

    c.bench_function("request_full_chain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator = coordinator();
                let outcome = coordinator
                    .request("miss.png", requester_fn(|| true, |_: &ResourceKey, _: Bytes| {}));
                if let Some(chain) = outcome.chain() {
                    chain.finished().await;
                }
            })
        });
    });

    c.bench_function("request_100_keys", |b| {
        b.iter(|| {
            rt.block_on(async {
                let coordinator = coordinator();
                let chains: Vec<_> = (0..100)
                    .filter_map(|i| {
                        coordinator
                            .request(
                                format!("img-{i}"),
                                requester_fn(|| true, |_: &ResourceKey, _: Bytes| {}),
                            )
                            .chain()
                            .cloned()
                    })
                    .collect();
                for chain in chains {
                    chain.finished().await;
                }
            })
        });
    });
}
