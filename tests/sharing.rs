use std::sync::Arc;

use quintet::{
    channel::{self, LocalTransport, TaskContext, TaskId, Transport},
    conditions::conditions,
    prf::SessionKey,
    protocol::{
        Error,
        linear::{Representation, add, affine, bit_transform_sharing, sub, transform_sharing},
        mul::mul,
        reconstruction::{default_informants, open, reconstruct},
        sharing::{
            joint_additive_offline, joint_additive_online, joint_share, reshare, share,
        },
        simulate, simulate_on,
    },
    ring::{Gf2, Z64},
    share::{PartyId, ReplicatedShare},
};

#[tokio::test(flavor = "multi_thread")]
async fn shared_values_open_at_the_target_only() -> Result<(), Error> {
    for value in [0, 1, 42, 1 << 63, u64::MAX] {
        let opened = simulate(1, move |mut node| async move {
            if node.id() == PartyId::P2 {
                node.set_value(7, value);
            }
            share::<Z64, _>(&mut node, PartyId::P2, 7).await?;
            reconstruct::<Z64, _>(&mut node, 7, default_informants(PartyId::P5), PartyId::P5)
                .await
        })
        .await?;
        assert_eq!(opened, [None, None, None, None, Some(value)]);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn boolean_shares_open_to_their_bit() -> Result<(), Error> {
    for bit in [0, 1] {
        let opened = simulate(1, move |mut node| async move {
            if node.id() == PartyId::P4 {
                node.set_value(0, bit);
            }
            let share = share::<Gf2, _>(&mut node, PartyId::P4, 0).await?;
            assert!(node.additive_share(0).is_ok());
            open::<Gf2, _>(&mut node, &share, default_informants(PartyId::P1), PartyId::P1).await
        })
        .await?;
        assert_eq!(opened[0], Some(bit));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn boolean_shares_survive_the_additive_form() -> Result<(), Error> {
    for bit in [0, 1] {
        let opened = simulate(1, move |mut node| async move {
            let me = node.id();
            if me == PartyId::P2 {
                node.set_value(3, bit);
            }
            let share = share::<Gf2, _>(&mut node, PartyId::P2, 3).await?;
            bit_transform_sharing(&mut node, 3, Representation::Additive)?;
            assert_eq!(node.additive_share(3)?, share.to_bit_additive(me));

            node.set_beta_share(3, ReplicatedShare::default());
            bit_transform_sharing(&mut node, 3, Representation::Beta)?;
            let restored = node.beta_share(3)?;
            open::<Gf2, _>(&mut node, &restored, default_informants(PartyId::P5), PartyId::P5)
                .await
        })
        .await?;
        assert_eq!(opened[4], Some(bit));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn joint_sharing_needs_no_single_owner() -> Result<(), Error> {
    let owners = [PartyId::P1, PartyId::P2, PartyId::P3];
    let opened = simulate(2, move |mut node| async move {
        let value = owners.contains(&node.id()).then_some(1234);
        let share = joint_share(&mut node, owners, value, 0).await?;
        open::<Z64, _>(&mut node, &share, owners, PartyId::P4).await
    })
    .await?;
    assert_eq!(opened[3], Some(1234));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn joint_additive_sharing_completes_the_zero_slot() -> Result<(), Error> {
    for condition in conditions().iter().copied().step_by(7) {
        let opened = simulate(3, move |mut node| async move {
            let mask = joint_additive_offline(&mut node, condition)?;
            let value = condition.is_sender(node.id()).then_some(99);
            joint_additive_online(&mut node, mask, value, 5).await?;
            transform_sharing(&mut node, 5, Representation::Beta)?;
            reconstruct::<Z64, _>(&mut node, 5, default_informants(PartyId::P1), PartyId::P1)
                .await
        })
        .await?;
        assert_eq!(opened[0], Some(99));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn resharing_keeps_the_value() -> Result<(), Error> {
    let opened = simulate(4, |mut node| async move {
        if node.id() == PartyId::P1 {
            node.set_value(0, 31337);
        }
        let before = share::<Z64, _>(&mut node, PartyId::P1, 0).await?;
        let after = reshare(&mut node, PartyId::P3, 0).await?;
        if node.id() != PartyId::P3 {
            assert_ne!(before.to_additive(node.id()), after.to_additive(node.id()));
        }
        reconstruct::<Z64, _>(&mut node, 0, default_informants(PartyId::P5), PartyId::P5).await
    })
    .await?;
    assert_eq!(opened[4], Some(31337));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn linear_operations_are_local() -> Result<(), Error> {
    let opened = simulate(5, |mut node| async move {
        if node.id() == PartyId::P1 {
            node.set_value(0, 1000);
            node.set_value(1, 58);
        }
        share::<Z64, _>(&mut node, PartyId::P1, 0).await?;
        share::<Z64, _>(&mut node, PartyId::P1, 1).await?;
        add(&mut node, 0, 1, 2)?;
        sub(&mut node, 0, 1, 3)?;
        affine(&mut node, 1, 3, u64::MAX, 4)?;
        transform_sharing(&mut node, 4, Representation::Additive)?;
        transform_sharing(&mut node, 4, Representation::Beta)?;
        let mut values = Vec::new();
        for key in 2..5 {
            values.push(
                reconstruct::<Z64, _>(&mut node, key, default_informants(PartyId::P2), PartyId::P2)
                    .await?,
            );
        }
        Ok(values)
    })
    .await?;
    assert_eq!(opened[1], [Some(1058), Some(942), Some(173)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_roles_are_rejected_before_sending() {
    let result = simulate(6, |mut node| async move {
        let share = node.beta_share(0).unwrap_or_default();
        let informants = [PartyId::P1, PartyId::P2, PartyId::P5];
        open::<Z64, _>(&mut node, &share, informants, PartyId::P5).await
    })
    .await;
    assert!(matches!(result, Err(Error::InvalidRoles(_))));
}

/// Forwards to an in-process transport, but corrupts everything one party sends to another.
struct LyingTransport {
    inner: Arc<LocalTransport>,
    liar: PartyId,
    victim: PartyId,
}

impl Transport for LyingTransport {
    fn id(&self) -> PartyId {
        self.inner.id()
    }

    fn send(&self, to: PartyId, ctx: TaskContext, value: u64) -> Result<(), channel::Error> {
        let value = if self.id() == self.liar && to == self.victim {
            value ^ 0x5a5a_5a5a
        } else {
            value
        };
        self.inner.send(to, ctx, value)
    }

    async fn receive(&self, ctx: TaskContext, count: usize) -> Result<u64, channel::Error> {
        self.inner.receive(ctx, count).await
    }

    fn release_task(&self, task: TaskId) {
        self.inner.release_task(task);
    }

    fn stop(&self) {
        self.inner.stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn one_lying_informant_is_outvoted() -> Result<(), Error> {
    let transports = LocalTransport::network().map(|inner| {
        Arc::new(LyingTransport {
            inner,
            liar: PartyId::P2,
            victim: PartyId::P5,
        })
    });
    let opened = simulate_on(&transports, 1, &SessionKey::default(), |mut node| async move {
        if node.id() == PartyId::P1 {
            node.set_value(0, 6_000_000);
            node.set_value(1, 7);
        }
        share::<Z64, _>(&mut node, PartyId::P1, 0).await?;
        share::<Z64, _>(&mut node, PartyId::P1, 1).await?;
        mul::<Z64, _>(&mut node, 0, 1, 2).await?;
        let informants = [PartyId::P1, PartyId::P2, PartyId::P3];
        reconstruct::<Z64, _>(&mut node, 2, informants, PartyId::P5).await
    })
    .await?;
    assert_eq!(opened[4], Some(42_000_000));
    Ok(())
}
