//! Input sharing, joint sharing and re-sharing.
//!
//! Every protocol here is split into an offline step, which draws the masks from the PRF without
//! any communication, and an online step, which distributes the masked value. The offline step
//! returns the masks the online step needs.
use tracing::{Level, instrument};

use super::{Error, distinct};
use crate::{
    channel::{TaskContext, Transport},
    conditions::SharingCondition,
    node::Node,
    ring::{Ring, Z64},
    share::{AdditiveShare, PARTIES, PartyId, ReplicatedShare},
};

/// The masks of a value owned by a single party, drawn in the offline phase.
#[derive(Debug, Clone, Copy)]
pub struct InputMask {
    owner: PartyId,
    key: u32,
    alpha: [u64; PARTIES],
}

impl InputMask {
    /// The party that knows the value in the clear.
    pub fn owner(&self) -> PartyId {
        self.owner
    }

    /// The store key the shared value is written to.
    pub fn key(&self) -> u32 {
        self.key
    }
}

/// Draws the masks for sharing `values[key]` of `owner`.
///
/// The owner knows all five mask components, every other party all but its own.
pub fn share_offline<R: Ring, T>(node: &mut Node<T>, owner: PartyId, key: u32) -> InputMask {
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let alpha = PartyId::ALL.map(|id| {
        if me != owner && id == me {
            0
        } else {
            R::reduce(node.mask(ctx, id.get() as u64))
        }
    });
    InputMask { owner, key, alpha }
}

/// Distributes the masked value of an input and stores the resulting share.
///
/// The owner sends `beta = Σalpha + value` to the other four parties, who wait for it. Boolean
/// shares are additionally stored in additive form.
pub async fn share_online<R: Ring, T: Transport>(
    node: &mut Node<T>,
    mask: InputMask,
) -> Result<ReplicatedShare, Error> {
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let beta = if me == mask.owner {
        let value = R::reduce(node.value(mask.key)?);
        let beta = R::add(R::sum(mask.alpha), value);
        for peer in me.others() {
            node.send(peer, ctx, beta)?;
        }
        beta
    } else {
        node.receive(ctx, 1).await?
    };
    let share = ReplicatedShare::new(mask.alpha, beta).without_own(me);
    node.set_beta_share(mask.key, share);
    if R::BOOLEAN {
        node.set_additive_share(mask.key, R::to_additive(&share, me));
    }
    Ok(share)
}

/// Shares `values[key]` of `owner` with all parties.
pub async fn share<R: Ring, T: Transport>(
    node: &mut Node<T>,
    owner: PartyId,
    key: u32,
) -> Result<ReplicatedShare, Error> {
    let mask = share_offline::<R, T>(node, owner, key);
    share_online::<R, T>(node, mask).await
}

/// Shares a contiguous range of inputs of `owner`, all offline steps first.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn share_all<R: Ring, T: Transport>(
    node: &mut Node<T>,
    owner: PartyId,
    keys: std::ops::Range<u32>,
) -> Result<(), Error> {
    let masks: Vec<_> = keys
        .map(|key| share_offline::<R, T>(node, owner, key))
        .collect();
    for mask in masks {
        share_online::<R, T>(node, mask).await?;
    }
    Ok(())
}

/// The masks of a value known to three owners, drawn in the offline phase.
#[derive(Debug, Clone, Copy)]
pub struct JointMask {
    owners: [PartyId; 3],
    alpha: [u64; PARTIES],
}

/// Draws the masks for a value known to the three `owners`.
///
/// Owners know all five components. The other two parties only miss their own.
pub fn joint_share_offline<T>(node: &mut Node<T>, owners: [PartyId; 3]) -> JointMask {
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let alpha = PartyId::ALL.map(|id| {
        if !owners.contains(&me) && id == me {
            0
        } else {
            node.mask(ctx, id.get() as u64)
        }
    });
    JointMask { owners, alpha }
}

/// Turns a value known to the three owners into a share.
///
/// Owners pass `Some(value)` and send `beta` to the two other parties, which take the majority
/// of the three copies.
pub async fn joint_share_online<T: Transport>(
    node: &mut Node<T>,
    mask: JointMask,
    value: Option<u64>,
) -> Result<ReplicatedShare, Error> {
    distinct(&mask.owners, "joint sharing owners must be distinct")?;
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let beta = if mask.owners.contains(&me) {
        let value = value.ok_or(Error::WrongRole(me))?;
        let beta = Z64::add(Z64::sum(mask.alpha), value);
        for receiver in PartyId::ALL.into_iter().filter(|p| !mask.owners.contains(p)) {
            node.send(receiver, ctx, beta)?;
        }
        beta
    } else {
        node.receive(ctx, 3).await?
    };
    Ok(ReplicatedShare::new(mask.alpha, beta).without_own(me))
}

/// Joint sharing of a value known to `owners`, stored under `key`.
pub async fn joint_share<T: Transport>(
    node: &mut Node<T>,
    owners: [PartyId; 3],
    value: Option<u64>,
    key: u32,
) -> Result<ReplicatedShare, Error> {
    let mask = joint_share_offline(node, owners);
    let share = joint_share_online(node, mask, value).await?;
    node.set_beta_share(key, share);
    Ok(share)
}

/// Draws the additive slots of a joint additive sharing under `condition`.
///
/// The slot of the zero holder is fixed to zero, the own slot of a non-sender is unknown to it.
/// `salt` separates the masks of several conditions sharing one operation id.
pub(crate) fn condition_mask<R: Ring, T>(
    node: &Node<T>,
    ctx: TaskContext,
    condition: &SharingCondition,
    salt: u64,
) -> [u64; PARTIES] {
    let me = node.id();
    PartyId::ALL.map(|id| {
        if id == condition.zero_holder || (!condition.is_sender(me) && id == me) {
            0
        } else {
            R::reduce(node.mask(ctx, id.get() as u64 + salt))
        }
    })
}

/// The correction a sender puts into the zero holder's slot so that the slots sum to `value`.
pub(crate) fn condition_correction<R: Ring>(
    condition: &SharingCondition,
    mask: &[u64; PARTIES],
    value: u64,
) -> u64 {
    let others = PartyId::ALL
        .into_iter()
        .filter(|id| *id != condition.zero_holder)
        .map(|id| mask[id.index()]);
    R::sub(value, R::sum(others))
}

/// The slots of an additive joint sharing, drawn in the offline phase.
#[derive(Debug, Clone, Copy)]
pub struct JointAdditiveMask {
    condition: SharingCondition,
    slots: [u64; PARTIES],
}

/// Draws the slots for an additive sharing of a value known to `condition.senders`.
pub fn joint_additive_offline<T>(
    node: &mut Node<T>,
    condition: SharingCondition,
) -> Result<JointAdditiveMask, Error> {
    let roles = [
        condition.senders[0],
        condition.senders[1],
        condition.senders[2],
        condition.receiver,
        condition.zero_holder,
    ];
    distinct(&roles, "senders, receiver and zero holder must be distinct")?;
    let ctx = node.reserve_ops(1);
    let slots = condition_mask::<Z64, T>(node, ctx, &condition, 0);
    Ok(JointAdditiveMask { condition, slots })
}

/// Completes an additive sharing of a value known to the senders.
///
/// The senders fix the zero holder's slot to `value - Σslots` and relay it to the receiver.
pub async fn joint_additive_online<T: Transport>(
    node: &mut Node<T>,
    mask: JointAdditiveMask,
    value: Option<u64>,
    key: u32,
) -> Result<AdditiveShare, Error> {
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let condition = mask.condition;
    let mut slots = mask.slots;
    if condition.is_sender(me) {
        let value = value.ok_or(Error::WrongRole(me))?;
        let correction = condition_correction::<Z64>(&condition, &slots, value);
        slots[condition.zero_holder.index()] = correction;
        node.send(condition.receiver, ctx, correction)?;
    } else if me == condition.receiver {
        slots[condition.zero_holder.index()] = node.receive(ctx, 3).await?;
    }
    let share = AdditiveShare::new(slots, me);
    node.set_additive_share(key, share);
    Ok(share)
}

/// Re-randomizes the additive form of `beta_shares[key]` and hands the fresh slots to `target`.
///
/// All parties but the target add zero-sum offsets to their slots. Each refreshed slot is then
/// relayed to the target by the three parties that know it. The result replaces the share
/// stored under `key`.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn reshare<T: Transport>(
    node: &mut Node<T>,
    target: PartyId,
    key: u32,
) -> Result<ReplicatedShare, Error> {
    let ctx = node.reserve_ops(PARTIES as u32);
    let me = node.id();
    let share = node.beta_share(key)?.to_additive(me);
    let mut slots = *share.slots();
    if me != target {
        let mut offsets = [0u64; PARTIES];
        for id in PartyId::ALL.into_iter().take(PARTIES - 1) {
            offsets[id.index()] = node.mask(ctx, id.get() as u64);
        }
        offsets[PARTIES - 1] = Z64::sum(offsets).wrapping_neg();
        for (slot, offset) in slots.iter_mut().zip(offsets) {
            *slot = slot.wrapping_add(offset);
        }
        slots[me.index()] = 0;
        for id in PartyId::ALL {
            if id != me && id != target {
                node.send(target, ctx.offset(id.index() as u32), slots[id.index()])?;
            }
        }
    } else {
        for id in me.others() {
            slots[id.index()] = node.receive(ctx.offset(id.index() as u32), 3).await?;
        }
    }
    let refreshed = AdditiveShare::new(slots, me);
    node.set_additive_share(key, refreshed);
    let share = refreshed.to_beta(me);
    node.set_beta_share(key, share);
    Ok(share)
}
