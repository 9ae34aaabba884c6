use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use criterion::Criterion;
use futures::future::try_join_all;
use quintet::{
    channel::LocalTransport,
    fcnn::{DATA_OWNER, Engine, ModelWeights, NetworkShape},
    prf::SessionKey,
    share::PartyId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::runtime::Runtime;

const SHAPE: NetworkShape = NetworkShape {
    input: 64,
    hidden: [32, 32],
    output: 10,
};

pub fn inference_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut rng = ChaCha20Rng::seed_from_u64(42);
    let values: Vec<u64> = (0..SHAPE.model_len())
        .map(|_| rng.random_range(-4096i64..4096) as u64)
        .collect();
    let model = Arc::new(ModelWeights::from_values(SHAPE, &values).unwrap());
    let image: Arc<Vec<u64>> =
        Arc::new((0..SHAPE.input).map(|_| rng.random_range(0..8192)).collect());

    let mut g = c.benchmark_group("inference");
    g.bench_function("64-32-32-10 network", |b| {
        b.to_async(&rt).iter_custom(|iters| {
            let (model, image) = (model.clone(), image.clone());
            async move {
                let mut elapsed = Duration::default();
                for _ in 0..iters {
                    let transports = LocalTransport::network();
                    let now = Instant::now();
                    let parties = PartyId::ALL.map(|id| {
                        let engine = Engine::new(
                            transports[id.index()].clone(),
                            &SessionKey::default(),
                            SHAPE,
                            8,
                        );
                        let (model, image) = (model.clone(), image.clone());
                        tokio::spawn(async move {
                            let owned = (id == DATA_OWNER).then_some(&*model);
                            let shared = engine.share_model(owned).await?;
                            let image = (id == DATA_OWNER).then_some(image.as_slice());
                            engine.infer(&shared, image, engine.image_task(0)).await
                        })
                    });
                    let results = try_join_all(parties).await.expect("party panicked");
                    for result in results {
                        result.expect("inference failed");
                    }
                    elapsed += now.elapsed();
                }
                elapsed
            }
        })
    });
    g.finish();
}
