use quintet::{
    channel::LocalTransport,
    prf::SessionKey,
    protocol::{
        Error,
        dot::{DotOperands, dot_product, dot_product_offline, dot_product_online},
        mul::{mul, mul_offline, mul_online, multiply_all},
        reconstruction::{default_informants, open, reconstruct},
        sharing::{share, share_all},
        simulate, simulate_on,
    },
    ring::{Gf2, Z64},
    share::PartyId,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

#[tokio::test(flavor = "multi_thread")]
async fn arithmetic_products_wrap_around() -> Result<(), Error> {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let mut cases = vec![(0, 12345), (u64::MAX, u64::MAX), (1 << 40, 1 << 30)];
    cases.extend((0..5).map(|_| (rng.random::<u64>(), rng.random::<u64>())));
    for (x, y) in cases {
        let opened = simulate(1, move |mut node| async move {
            if node.id() == PartyId::P3 {
                node.set_value(0, x);
                node.set_value(1, y);
            }
            share::<Z64, _>(&mut node, PartyId::P3, 0).await?;
            share::<Z64, _>(&mut node, PartyId::P3, 1).await?;
            mul::<Z64, _>(&mut node, 0, 1, 2).await?;
            reconstruct::<Z64, _>(&mut node, 2, default_informants(PartyId::P1), PartyId::P1)
                .await
        })
        .await?;
        assert_eq!(opened[0], Some(x.wrapping_mul(y)), "{x} * {y}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn boolean_products_are_and() -> Result<(), Error> {
    for x in [0, 1] {
        for y in [0, 1] {
            let opened = simulate(1, move |mut node| async move {
                if node.id() == PartyId::P1 {
                    node.set_value(0, x);
                }
                if node.id() == PartyId::P2 {
                    node.set_value(1, y);
                }
                share::<Gf2, _>(&mut node, PartyId::P1, 0).await?;
                share::<Gf2, _>(&mut node, PartyId::P2, 1).await?;
                let z = mul::<Gf2, _>(&mut node, 0, 1, 2).await?;
                assert!(node.additive_share(2).is_ok());
                open::<Gf2, _>(&mut node, &z, default_informants(PartyId::P5), PartyId::P5).await
            })
            .await?;
            assert_eq!(opened[4], Some(x & y));
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_and_online_phases_can_be_split() -> Result<(), Error> {
    let opened = simulate(1, |mut node| async move {
        if node.id() == PartyId::P1 {
            node.set_value(0, 3);
            node.set_value(1, 5);
            node.set_value(2, 11);
        }
        share_all::<Z64, _>(&mut node, PartyId::P1, 0..3).await?;
        mul_offline::<Z64, _>(&mut node, 0, 1, 10).await?;
        mul_offline::<Z64, _>(&mut node, 1, 2, 11).await?;
        mul_online::<Z64, _>(&mut node, 1, 2, 11).await?;
        mul_online::<Z64, _>(&mut node, 0, 1, 10).await?;
        let informants = default_informants(PartyId::P4);
        let a = reconstruct::<Z64, _>(&mut node, 10, informants, PartyId::P4).await?;
        let b = reconstruct::<Z64, _>(&mut node, 11, informants, PartyId::P4).await?;
        Ok((a, b))
    })
    .await?;
    assert_eq!(opened[3], (Some(15), Some(55)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn batched_products_match_single_products() -> Result<(), Error> {
    let opened = simulate(1, |mut node| async move {
        if node.id() == PartyId::P2 {
            for key in 0..6 {
                node.set_value(key, key as u64 + 2);
            }
        }
        share_all::<Z64, _>(&mut node, PartyId::P2, 0..6).await?;
        let pairs = [(0, 1), (2, 3), (4, 5)]
            .map(|(x, y)| Ok((node.beta_share(x)?, node.beta_share(y)?)))
            .into_iter()
            .collect::<Result<Vec<_>, Error>>()?;
        let products = multiply_all::<Z64, _>(&mut node, &pairs).await?;
        let informants = default_informants(PartyId::P5);
        let mut values = Vec::new();
        for z in &products {
            values.push(open::<Z64, _>(&mut node, z, informants, PartyId::P5).await?);
        }
        Ok(values)
    })
    .await?;
    assert_eq!(opened[4], [Some(6), Some(20), Some(42)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dot_product_of_two_vectors() -> Result<(), Error> {
    let xs = [3122u64, 463, 734, 2553, 1065];
    let ys = [524u64, 1605, 4357, 578, 394];
    let expected: u64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let opened = simulate(1, move |mut node| async move {
        if node.id() == PartyId::P1 {
            for (i, (x, y)) in xs.iter().zip(&ys).enumerate() {
                node.set_value(i as u32, *x);
                node.set_value(10 + i as u32, *y);
            }
        }
        share_all::<Z64, _>(&mut node, PartyId::P1, 0..5).await?;
        share_all::<Z64, _>(&mut node, PartyId::P1, 10..15).await?;
        let operands = DotOperands {
            x_start: 0,
            y_start: 10,
            len: 5,
        };
        dot_product::<Z64, _>(&mut node, operands, 20).await?;
        dot_product_offline::<Z64, _>(&mut node, operands, 21).await?;
        dot_product_online::<Z64, _>(&mut node, operands, 21).await?;
        let informants = default_informants(PartyId::P5);
        let a = reconstruct::<Z64, _>(&mut node, 20, informants, PartyId::P5).await?;
        let b = reconstruct::<Z64, _>(&mut node, 21, informants, PartyId::P5).await?;
        Ok((a, b))
    })
    .await?;
    assert_eq!(expected, 7_472_325);
    assert_eq!(opened[4], (Some(expected), Some(expected)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn online_phase_requires_offline_phase() {
    let result = simulate(1, |mut node| async move {
        if node.id() == PartyId::P1 {
            node.set_value(0, 1);
        }
        share::<Z64, _>(&mut node, PartyId::P1, 0).await?;
        mul_online::<Z64, _>(&mut node, 0, 0, 1).await
    })
    .await;
    assert!(matches!(result, Err(Error::Store(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_tasks_do_not_interfere() -> Result<(), Error> {
    let network = LocalTransport::network();
    let key = SessionKey::default();
    let run = |task: u32| {
        simulate_on(&network, task, &key, move |mut node| async move {
            if node.id() == PartyId::P1 {
                node.set_value(0, task as u64);
                node.set_value(1, 1000);
            }
            share_all::<Z64, _>(&mut node, PartyId::P1, 0..2).await?;
            mul::<Z64, _>(&mut node, 0, 1, 2).await?;
            let value =
                reconstruct::<Z64, _>(&mut node, 2, default_informants(PartyId::P5), PartyId::P5)
                    .await?;
            node.release();
            Ok(value)
        })
    };
    let (a, b, c) = tokio::try_join!(run(11), run(12), run(13))?;
    assert_eq!(a[4], Some(11_000));
    assert_eq!(b[4], Some(12_000));
    assert_eq!(c[4], Some(13_000));
    Ok(())
}
