//! Boolean to arithmetic conversion.
//!
//! A boolean share `b = β ⊕ a_1 ⊕ … ⊕ a_5` is converted by lifting the five mask bits to
//! arithmetic shares, XOR-ing them with `u ⊕ v = u + v - 2uv` (four multiplications) and adding
//! the public `β` locally: `b = A + β - 2βA`.
use super::{Error, mul::multiply_all};
use crate::{
    channel::Transport,
    node::Node,
    ring::Z64,
    share::{AdditiveShare, PartyId, ReplicatedShare},
};

/// Arithmetic shares of the mask bits `a_i` of a boolean share.
fn lifted_mask_bits(me: PartyId, bit: &ReplicatedShare) -> Vec<ReplicatedShare> {
    PartyId::ALL
        .into_iter()
        .map(|holder| AdditiveShare::single(holder, bit.alpha(holder) & 1, me).to_beta(me))
        .collect()
}

/// Offline phase for several bits at once: arithmetic shares of `⊕a_i` for every bit.
///
/// The XOR chains of all bits advance in lockstep, so the whole batch takes four rounds.
pub async fn lift_masks<T: Transport>(
    node: &mut Node<T>,
    bits: &[ReplicatedShare],
) -> Result<Vec<ReplicatedShare>, Error> {
    let me = node.id();
    let lifted: Vec<_> = bits.iter().map(|bit| lifted_mask_bits(me, bit)).collect();
    let mut acc: Vec<_> = lifted.iter().map(|l| l[0]).collect();
    for holder in 1..lifted.first().map_or(0, Vec::len) {
        let pairs: Vec<_> = acc
            .iter()
            .zip(&lifted)
            .map(|(a, l)| (*a, l[holder]))
            .collect();
        let products = multiply_all::<Z64, T>(node, &pairs).await?;
        acc = acc
            .iter()
            .zip(&lifted)
            .zip(&products)
            .map(|((a, l), p)| a.add(&l[holder]).sub(&p.scale(2)))
            .collect();
    }
    Ok(acc)
}

/// Online phase: folds the public bit `β` into the lifted mask.
pub fn unmask(lifted: &ReplicatedShare, beta: u64) -> ReplicatedShare {
    let beta = beta & 1;
    lifted
        .scale(1u64.wrapping_sub(2 * beta))
        .add_public(beta)
}

/// Converts one boolean share into an arithmetic share of the same bit.
pub async fn bit_to_arithmetic<T: Transport>(
    node: &mut Node<T>,
    bit: &ReplicatedShare,
) -> Result<ReplicatedShare, Error> {
    let lifted = lift_masks(node, std::slice::from_ref(bit)).await?;
    Ok(unmask(&lifted[0], bit.beta()))
}

/// Converts boolean shares of the bits of a value (least significant first) into an
/// arithmetic share of the value.
pub async fn recompose<T: Transport>(
    node: &mut Node<T>,
    bits: &[ReplicatedShare],
) -> Result<ReplicatedShare, Error> {
    let lifted = lift_masks(node, bits).await?;
    let value = lifted
        .iter()
        .zip(bits)
        .enumerate()
        .fold(ReplicatedShare::default(), |acc, (t, (l, bit))| {
            acc.add(&unmask(l, bit.beta()).scale(1u64 << t))
        });
    Ok(value.without_own(node.id()))
}

/// Offline phase: stores the lifted mask of `beta_shares[bit_key]` under `work_key`.
pub async fn b2a_offline<T: Transport>(
    node: &mut Node<T>,
    bit_key: u32,
    work_key: u32,
) -> Result<(), Error> {
    let bit = node.beta_share(bit_key)?;
    let lifted = lift_masks(node, &[bit]).await?;
    node.set_beta_share(work_key, lifted[0]);
    Ok(())
}

/// Online phase: stores the arithmetic share of `bit_key` under `out_key`.
pub fn b2a_online<T>(
    node: &mut Node<T>,
    bit_key: u32,
    work_key: u32,
    out_key: u32,
) -> Result<ReplicatedShare, Error> {
    let bit = node.beta_share(bit_key)?;
    let lifted = node.beta_share(work_key)?;
    let value = unmask(&lifted, bit.beta());
    node.set_beta_share(out_key, value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::reveal;

    #[test]
    fn unmask_flips_on_public_one() {
        for (mask, beta) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            let views = PartyId::ALL.map(|_| ReplicatedShare::public(mask));
            let result = PartyId::ALL.map(|p| unmask(&views[p.index()], beta));
            assert_eq!(reveal(&result), mask ^ beta);
        }
    }
}
