use std::sync::Arc;

use futures::future::try_join_all;
use quintet::{
    channel::{LocalTransport, Transport},
    fcnn::{
        DATA_OWNER, Engine, LoadError, MODEL_TASK, ModelWeights, NetworkShape, Prediction,
        RESULT_PARTY, read_labels, read_pixels, reference_inference, reference_logits,
        write_values,
    },
    prf::SessionKey,
    protocol::Error,
    share::PartyId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const ONE: i64 = 1 << 13;

fn synthetic_model(shape: NetworkShape, seed: u64) -> Result<ModelWeights, LoadError> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let values: Vec<u64> = (0..shape.model_len())
        .map(|_| rng.random_range(-ONE / 2..ONE / 2) as u64)
        .collect();
    ModelWeights::from_values(shape, &values)
}

fn synthetic_images(shape: NetworkShape, count: usize, seed: u64) -> Vec<Vec<u64>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..shape.input)
                .map(|_| rng.random_range(0..ONE) as u64)
                .collect()
        })
        .collect()
}

/// Runs all five parties over an in-process network and returns the predictions of party 5.
///
/// With `concurrent`, each party evaluates all images at the same time.
async fn secure_inference(
    model: &ModelWeights,
    images: &[Vec<u64>],
    parallelism: usize,
    concurrent: bool,
) -> Result<Vec<Prediction>, Error> {
    let shape = model.shape();
    let transports = LocalTransport::network();
    let owned = Arc::new((model.clone(), images.to_vec()));
    let count = images.len() as u32;
    let parties = PartyId::ALL.map(|id| {
        let engine = Engine::new(
            transports[id.index()].clone(),
            &SessionKey::default(),
            shape,
            parallelism,
        );
        let owned = (id == DATA_OWNER).then(|| owned.clone());
        let transports = transports.clone();
        tokio::spawn(async move {
            let result = async {
                let shared = engine.share_model(owned.as_deref().map(|(m, _)| m)).await?;
                let image = |i: u32| {
                    owned
                        .as_deref()
                        .map(|(_, images)| images[i as usize].as_slice())
                };
                let predictions = if concurrent {
                    let runs = (0..count)
                        .map(|i| engine.infer(&shared, image(i), engine.image_task(i)));
                    try_join_all(runs).await?
                } else {
                    let mut predictions = Vec::new();
                    for i in 0..count {
                        let task = engine.image_task(i);
                        predictions.push(engine.infer(&shared, image(i), task).await?);
                    }
                    predictions
                };
                Ok::<_, Error>(predictions.into_iter().flatten().collect::<Vec<_>>())
            }
            .await;
            if result.is_err() {
                transports.iter().for_each(|t| t.stop());
            }
            result
        })
    });
    let mut results = try_join_all(parties)
        .await?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    for (id, predictions) in PartyId::ALL.iter().zip(&results) {
        if *id != RESULT_PARTY {
            assert!(predictions.is_empty(), "party {id} learned a prediction");
        }
    }
    Ok(results.swap_remove(RESULT_PARTY.index()))
}

#[tokio::test(flavor = "multi_thread")]
async fn secure_inference_matches_the_plaintext_reference() -> Result<(), Error> {
    let shape = NetworkShape {
        input: 4,
        hidden: [3, 3],
        output: 2,
    };
    let model = synthetic_model(shape, 1).expect("model has the right size");
    let images = synthetic_images(shape, 3, 2);
    let predictions = secure_inference(&model, &images, 2, false).await?;
    assert_eq!(predictions.len(), images.len());
    for (prediction, image) in predictions.iter().zip(&images) {
        assert_eq!(prediction.logits, reference_logits(&model, image));
        assert_eq!(prediction.class, reference_inference(&model, image));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_images_are_isolated() -> Result<(), Error> {
    let shape = NetworkShape {
        input: 6,
        hidden: [4, 4],
        output: 3,
    };
    let model = synthetic_model(shape, 3).expect("model has the right size");
    let images = synthetic_images(shape, 3, 4);
    let predictions = secure_inference(&model, &images, 3, true).await?;
    let expected: Vec<_> = images
        .iter()
        .map(|image| reference_logits(&model, image))
        .collect();
    let logits: Vec<_> = predictions.into_iter().map(|p| p.logits).collect();
    assert_eq!(logits, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_without_a_model_is_rejected() {
    let [p1, ..] = LocalTransport::network();
    let engine = Engine::new(p1, &SessionKey::default(), NetworkShape::default(), 1);
    let result = engine.share_model(None).await;
    assert!(matches!(result, Err(Error::WrongRole(PartyId::P1))));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_model_is_shared_only_once() -> Result<(), Error> {
    let shape = NetworkShape {
        input: 2,
        hidden: [2, 2],
        output: 2,
    };
    let model = Arc::new(synthetic_model(shape, 6).expect("model has the right size"));
    let parties = LocalTransport::network().map(|transport| {
        let model = model.clone();
        tokio::spawn(async move {
            let id = transport.id();
            let engine = Engine::new(transport, &SessionKey::default(), shape, 1);
            let model = (id == DATA_OWNER).then_some(model.as_ref());
            engine.share_model(model).await?;
            Ok::<_, Error>(engine.share_model(model).await)
        })
    });
    for second in try_join_all(parties).await? {
        assert!(matches!(second?, Err(Error::TaskReused(MODEL_TASK))));
    }
    Ok(())
}

#[test]
fn test_data_round_trips_through_the_file_format() -> Result<(), LoadError> {
    let shape = NetworkShape {
        input: 4,
        hidden: [3, 3],
        output: 2,
    };
    let images = synthetic_images(shape, 5, 9);
    let mut pixels = Vec::new();
    write_values(&mut pixels, &images.concat())?;
    assert_eq!(read_pixels(pixels.as_slice(), shape.input)?, images);

    let mut labels = Vec::new();
    write_values(&mut labels, &[7, 2, 1])?;
    assert_eq!(read_labels(labels.as_slice())?, [7, 2, 1]);

    let model = synthetic_model(shape, 5)?;
    let mut weights = Vec::new();
    model.write_to(&mut weights)?;
    assert_eq!(ModelWeights::read_from(weights.as_slice(), shape)?, model);
    assert!(matches!(
        ModelWeights::read_from(&weights[..weights.len() - 8], shape),
        Err(LoadError::Truncated { .. })
    ));
    Ok(())
}
