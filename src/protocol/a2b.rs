//! Arithmetic to boolean conversion.
//!
//! A share `x = β - Σα_i` is decomposed by adding the bits of the five values `-α_i` with a
//! shared ripple-carry adder. Each `-α_i` is known to all parties except `i`, so its bits can be
//! shared without communication. The four additions only depend on the masks and run offline.
//! Online, the public bits of `β` are added with one more ripple-carry pass, where only the
//! AND with the running carry needs a multiplication.
use tracing::{Level, debug, instrument};

use super::{Error, mul::multiply_all};
use crate::{
    channel::Transport,
    node::Node,
    ring::{Gf2, Ring},
    share::{AdditiveShare, PartyId, ReplicatedShare},
};

/// The width of a decomposed value.
pub const BITS: usize = 64;

/// Adds two shared bit vectors modulo `2^64` with a ripple-carry adder.
///
/// `sum = a ⊕ b ⊕ c` and `c' = (a ∧ b) ⊕ ((a ⊕ b) ∧ c)`. Both ANDs of one position share a
/// round, the carry out of the top bit is dropped.
async fn ripple_add<T: Transport>(
    node: &mut Node<T>,
    a: &[ReplicatedShare],
    b: &[ReplicatedShare],
) -> Result<Vec<ReplicatedShare>, Error> {
    let mut sum = Vec::with_capacity(BITS);
    sum.push(a[0].xor(&b[0]));
    let mut carry = multiply_all::<Gf2, T>(node, &[(a[0], b[0])]).await?[0];
    for t in 1..BITS {
        let half = a[t].xor(&b[t]);
        sum.push(half.xor(&carry));
        if t + 1 < BITS {
            let ands = multiply_all::<Gf2, T>(node, &[(a[t], b[t]), (half, carry)]).await?;
            carry = ands[0].xor(&ands[1]);
        }
    }
    Ok(sum)
}

/// Boolean shares of the bits of `-α_holder`, known to everyone but `holder`.
fn mask_bits(me: PartyId, share: &ReplicatedShare, holder: PartyId) -> Vec<ReplicatedShare> {
    let value = share.alpha(holder).wrapping_neg();
    (0..BITS)
        .map(|t| AdditiveShare::single(holder, (value >> t) & 1, me).to_bit_beta(me))
        .collect()
}

/// Computes boolean shares of the bits of `-Σα` for the mask of `x`.
pub async fn decompose_mask<T: Transport>(
    node: &mut Node<T>,
    x: &ReplicatedShare,
) -> Result<Vec<ReplicatedShare>, Error> {
    let me = node.id();
    let mut acc = mask_bits(me, x, PartyId::P1);
    for holder in PartyId::ALL.into_iter().skip(1) {
        let next = mask_bits(me, x, holder);
        acc = ripple_add(node, &acc, &next).await?;
    }
    debug!(party = %me, "decomposed mask");
    Ok(acc)
}

/// Adds the public bits of `beta` to the decomposed mask. One multiplication per bit.
pub async fn add_public_bits<T: Transport>(
    node: &mut Node<T>,
    mask: &[ReplicatedShare],
    beta: u64,
) -> Result<Vec<ReplicatedShare>, Error> {
    let bit = |t: usize| (beta >> t) & 1;
    let mut bits = Vec::with_capacity(BITS);
    bits.push(mask[0].xor_public(bit(0)));
    let mut carry = mask[0].and_public(bit(0));
    for t in 1..BITS {
        let half = mask[t].xor_public(bit(t));
        bits.push(half.xor(&carry));
        if t + 1 < BITS {
            let through = multiply_all::<Gf2, T>(node, &[(half, carry)]).await?[0];
            carry = mask[t].and_public(bit(t)).xor(&through);
        }
    }
    Ok(bits)
}

/// Decomposes `x` into 64 boolean shares, least significant bit first.
pub async fn decompose<T: Transport>(
    node: &mut Node<T>,
    x: &ReplicatedShare,
) -> Result<Vec<ReplicatedShare>, Error> {
    let mask = decompose_mask(node, x).await?;
    add_public_bits(node, &mask, x.beta()).await
}

/// Offline phase: decomposes the mask of `beta_shares[x_key]` and stages it under `stage`.
pub async fn a2b_offline<T: Transport>(
    node: &mut Node<T>,
    x_key: u32,
    stage: u8,
) -> Result<(), Error> {
    let me = node.id();
    let x = node.beta_share(x_key)?;
    let mask = decompose_mask(node, &x).await?;
    let staged = mask.iter().map(|bit| Gf2::to_additive(bit, me)).collect();
    node.set_a2b_bits(stage, staged);
    Ok(())
}

/// Online phase: stores the 64 bit shares of `x_key` at `out_start..out_start + 64`.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn a2b_online<T: Transport>(
    node: &mut Node<T>,
    x_key: u32,
    stage: u8,
    out_start: u32,
) -> Result<(), Error> {
    let me = node.id();
    let x = node.beta_share(x_key)?;
    let mask: Vec<_> = node
        .a2b_bits(stage)?
        .iter()
        .map(|bit| Gf2::to_beta(bit, me))
        .collect();
    let bits = add_public_bits(node, &mask, x.beta()).await?;
    for (t, bit) in bits.iter().enumerate() {
        let key = out_start + t as u32;
        node.set_beta_share(key, *bit);
        node.set_additive_share(key, Gf2::to_additive(bit, me));
    }
    Ok(())
}
