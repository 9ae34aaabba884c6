//! Removal of the fixed-point scale from a shared value.
//!
//! The offline phase produces a uniform 64-bit mask `r` whose bits are individually shared,
//! along with shares of `r` and `r >> 13`. Online, `d = x - r` is opened to parties 1, 2 and 3.
//! They shift it arithmetically and share the result jointly, together with the 64 bits of
//! `e = d ⊕ 2^63`. Since `e + r = x + 2^63`, adding `r >> 13`, the carry of `e + r` into bit 13
//! and `-2^51` times the carry out of bit 63 gives exactly `x >> 13` (arithmetic shift) for
//! every 64-bit input.
use tracing::{Level, instrument, trace};

use super::{
    Error,
    mul::multiply_all,
    reconstruction::open,
    sharing::{joint_share_offline, joint_share_online},
};
use crate::{
    channel::Transport,
    node::Node,
    ring::Z64,
    share::{AdditiveShare, PartyId, ReplicatedShare},
};

/// The number of fractional bits of the fixed-point encoding.
pub const TRUNCATED_BITS: u32 = 13;

/// The number of random bits in a truncation mask.
pub const MASK_BITS: u32 = 64;

const LOW_BITS: usize = TRUNCATED_BITS as usize;
const BITS: usize = MASK_BITS as usize;
const SIGN_BIT: u64 = 1 << 63;

/// The parties that learn the masked difference.
const OPENERS: [PartyId; 3] = [PartyId::P1, PartyId::P2, PartyId::P3];

/// A shared random mask in three forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationMask {
    full: ReplicatedShare,
    truncated: ReplicatedShare,
    bits: [ReplicatedShare; BITS],
}

impl TruncationMask {
    /// A share of the full mask `r`.
    pub fn full(&self) -> &ReplicatedShare {
        &self.full
    }

    /// A share of `r >> 13`.
    pub fn truncated(&self) -> &ReplicatedShare {
        &self.truncated
    }

    /// Arithmetic shares of the bits of `r`, least significant first.
    pub fn bits(&self) -> &[ReplicatedShare; BITS] {
        &self.bits
    }
}

/// Draws a fresh shared truncation mask.
///
/// Each mask bit is the XOR of three random bits. Bit `k` is known to everyone but party `k`,
/// so no single party knows the mask. The XOR is evaluated arithmetically as
/// `Σr_k - 2Σr_i·r_j + 4·r_1·r_2·r_3`, with all products of all bits in two rounds.
pub async fn generate_mask<T: Transport>(node: &mut Node<T>) -> Result<TruncationMask, Error> {
    let ctx = node.reserve_ops(1);
    let me = node.id();
    let holders = [PartyId::P1, PartyId::P2, PartyId::P3];
    let random_bits: Vec<[ReplicatedShare; 3]> = (0..MASK_BITS as u64)
        .map(|t| {
            holders.map(|k| {
                let bit = node.mask(ctx, 3 * t + k.get() as u64) & 1;
                AdditiveShare::single(k, bit, me).to_beta(me)
            })
        })
        .collect();

    let pairs: Vec<_> = random_bits
        .iter()
        .flat_map(|[r1, r2, r3]| [(*r1, *r2), (*r1, *r3), (*r2, *r3)])
        .collect();
    let products = multiply_all::<Z64, T>(node, &pairs).await?;
    let triples: Vec<_> = random_bits
        .iter()
        .zip(products.chunks_exact(3))
        .map(|([_, _, r3], p)| (p[0], *r3))
        .collect();
    let triple_products = multiply_all::<Z64, T>(node, &triples).await?;

    let bits: Vec<ReplicatedShare> = random_bits
        .iter()
        .zip(products.chunks_exact(3))
        .zip(&triple_products)
        .map(|(([r1, r2, r3], p), r123)| {
            let linear = r1.add(r2).add(r3);
            let pairwise = p[0].add(&p[1]).add(&p[2]);
            linear.sub(&pairwise.scale(2)).add(&r123.scale(4))
        })
        .collect();

    let mut full = ReplicatedShare::default();
    let mut truncated = ReplicatedShare::default();
    for (t, bit) in bits.iter().enumerate() {
        full = full.add(&bit.scale(1 << t));
        if t >= LOW_BITS {
            truncated = truncated.add(&bit.scale(1 << (t - LOW_BITS)));
        }
    }
    let bits = std::array::from_fn(|t| bits[t]);
    Ok(TruncationMask {
        full: full.without_own(me),
        truncated: truncated.without_own(me),
        bits,
    })
}

/// Offline phase: draws a truncation mask and keeps it under `mask_key`.
pub async fn truncation_offline<T: Transport>(
    node: &mut Node<T>,
    mask_key: u8,
) -> Result<(), Error> {
    let mask = generate_mask(node).await?;
    node.set_truncation_mask(mask_key, mask);
    Ok(())
}

/// Shifts an opened difference, sign-extending when a borrow was recorded.
pub fn right_shift(d: u64, wrap: bool) -> u64 {
    let shifted = d >> TRUNCATED_BITS;
    if wrap {
        shifted | (u64::MAX << (64 - TRUNCATED_BITS))
    } else {
        shifted
    }
}

/// Computes the carries of `e + r` into bit 13 and out of bit 63.
///
/// A parallel prefix over generate and propagate bits, with `g_t = e_t·r_t` and
/// `p_t = e_t ⊕ r_t = e_t + r_t - 2·e_t·r_t`. The generate and propagate bits of a range are
/// never both set, so `g + p·g'` stays a bit. Takes one round per doubling of the range.
async fn carries<T: Transport>(
    node: &mut Node<T>,
    e_bits: &[ReplicatedShare; BITS],
    r_bits: &[ReplicatedShare; BITS],
) -> Result<(ReplicatedShare, ReplicatedShare), Error> {
    let pairs: Vec<_> = e_bits.iter().copied().zip(r_bits.iter().copied()).collect();
    let mut generate = multiply_all::<Z64, T>(node, &pairs).await?;
    let mut propagate: Vec<_> = e_bits
        .iter()
        .zip(r_bits)
        .zip(&generate)
        .map(|((e, r), g)| e.add(r).sub(&g.scale(2)))
        .collect();
    let mut distance = 1;
    while distance < BITS {
        let pairs: Vec<_> = (distance..BITS)
            .flat_map(|t| {
                [
                    (propagate[t], generate[t - distance]),
                    (propagate[t], propagate[t - distance]),
                ]
            })
            .collect();
        let products = multiply_all::<Z64, T>(node, &pairs).await?;
        for (t, p) in (distance..BITS).zip(products.chunks_exact(2)) {
            generate[t] = generate[t].add(&p[0]);
            propagate[t] = p[1];
        }
        distance *= 2;
    }
    Ok((generate[LOW_BITS - 1], generate[BITS - 1]))
}

/// Online phase: truncates `x` with a previously generated mask.
///
/// The result is a share of `(x as i64) >> 13`, exact over the whole 64-bit range.
pub async fn truncate_share<T: Transport>(
    node: &mut Node<T>,
    x: &ReplicatedShare,
    mask: &TruncationMask,
) -> Result<ReplicatedShare, Error> {
    let me = node.id();
    let d = x.sub(&mask.full);
    let informants = [
        [PartyId::P3, PartyId::P4, PartyId::P5],
        [PartyId::P3, PartyId::P4, PartyId::P5],
        [PartyId::P2, PartyId::P4, PartyId::P5],
    ];
    let mut opened = None;
    for (target, informants) in OPENERS.into_iter().zip(informants) {
        if let Some(value) = open::<Z64, T>(node, &d, informants, target).await? {
            opened = Some(value);
        }
    }
    if let Some(d) = opened {
        node.set_truncation_wrap((d as i64) < 0);
    }
    let wrap = node.take_truncation_wrap();
    let shifted_value = opened.map(|d| right_shift(d, wrap));
    trace!(party = %me, wrap, "shifted opened difference");

    let shifted_mask = joint_share_offline(node, OPENERS);
    let bit_masks: Vec<_> = (0..BITS)
        .map(|_| joint_share_offline(node, OPENERS))
        .collect();
    let shifted = joint_share_online(node, shifted_mask, shifted_value).await?;
    let mut e_bits = [ReplicatedShare::default(); BITS];
    for (t, bit_mask) in bit_masks.into_iter().enumerate() {
        let bit = opened.map(|d| ((d ^ SIGN_BIT) >> t) & 1);
        e_bits[t] = joint_share_online(node, bit_mask, bit).await?;
    }

    let (low_carry, overflow) = carries(node, &e_bits, &mask.bits).await?;
    let z = shifted
        .add(&mask.truncated)
        .add(&low_carry)
        .sub(&overflow.scale(1 << (64 - TRUNCATED_BITS)));
    Ok(z.without_own(me))
}

/// Online phase: stores a share of `x_key >> 13` under `z_key`, using the mask under
/// `mask_key`.
pub async fn truncation_online<T: Transport>(
    node: &mut Node<T>,
    x_key: u32,
    mask_key: u8,
    z_key: u32,
) -> Result<ReplicatedShare, Error> {
    let x = node.beta_share(x_key)?;
    let mask = node.truncation_mask(mask_key)?.clone();
    let z = truncate_share(node, &x, &mask).await?;
    node.set_beta_share(z_key, z);
    Ok(z)
}

/// Stores a share of `x_key >> 13` under `z_key`, drawing a fresh mask.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn truncate<T: Transport>(
    node: &mut Node<T>,
    x_key: u32,
    z_key: u32,
) -> Result<ReplicatedShare, Error> {
    let x = node.beta_share(x_key)?;
    let mask = generate_mask(node).await?;
    let z = truncate_share(node, &x, &mask).await?;
    node.set_beta_share(z_key, z);
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_shift_sign_extends_on_wrap() {
        let d = (-5_000_000i64) as u64;
        assert_eq!(right_shift(d, true) as i64, -5_000_000i64 >> 13);
        assert_eq!(right_shift(1 << 20, false), 1 << 7);
        assert_eq!(right_shift(u64::MAX, true), u64::MAX);
    }
}
