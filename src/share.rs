//! Party identifiers and the two share representations every protocol operates on.
//!
//! A [`ReplicatedShare`] represents a secret `v = beta - Σ alpha_i` (or `beta ⊕ ⊕alpha_i` in the
//! boolean ring). Every party knows `beta` and the four mask components of the *other* parties,
//! so any three consistent parties together can reconstruct the full mask sum. An
//! [`AdditiveShare`] splits a secret into five components where slot `i` is known to everyone
//! except party `i`.
//!
//! The holder's own slot is never known to the holder. All conversions in this module take the
//! holder's [`PartyId`] and keep that slot at zero.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed number of parties taking part in every protocol.
pub const PARTIES: usize = 5;

/// The identifier of one of the five parties, always in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PartyId(u8);

/// Raised when a party id outside of `1..=5` is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("party ids must be between 1 and 5, got {0}")]
pub struct InvalidPartyId(pub u8);

impl PartyId {
    /// Party 1.
    pub const P1: PartyId = PartyId(1);
    /// Party 2.
    pub const P2: PartyId = PartyId(2);
    /// Party 3.
    pub const P3: PartyId = PartyId(3);
    /// Party 4.
    pub const P4: PartyId = PartyId(4);
    /// Party 5.
    pub const P5: PartyId = PartyId(5);

    /// All parties in ascending order.
    pub const ALL: [PartyId; PARTIES] = [Self::P1, Self::P2, Self::P3, Self::P4, Self::P5];

    /// Validates and wraps a numeric party id.
    pub fn new(id: u8) -> Result<Self, InvalidPartyId> {
        if (1..=PARTIES as u8).contains(&id) {
            Ok(PartyId(id))
        } else {
            Err(InvalidPartyId(id))
        }
    }

    /// The numeric id in `1..=5`.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The zero-based slot of this party in 5-element arrays.
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Iterates over the four parties other than `self`.
    pub fn others(self) -> impl Iterator<Item = PartyId> {
        Self::ALL.into_iter().filter(move |&p| p != self)
    }
}

impl TryFrom<u8> for PartyId {
    type Error = InvalidPartyId;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        PartyId::new(id)
    }
}

impl From<PartyId> for u8 {
    fn from(id: PartyId) -> Self {
        id.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A replicated secret share as seen by one party.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicatedShare {
    alpha: [u64; PARTIES],
    beta: u64,
}

impl ReplicatedShare {
    /// Creates a share from its mask components and masked value.
    pub const fn new(alpha: [u64; PARTIES], beta: u64) -> Self {
        Self { alpha, beta }
    }

    /// A share of a public constant, with all masks set to zero.
    pub const fn public(value: u64) -> Self {
        Self {
            alpha: [0; PARTIES],
            beta: value,
        }
    }

    /// The mask component of party `id`.
    pub fn alpha(&self, id: PartyId) -> u64 {
        self.alpha[id.index()]
    }

    /// Overwrites the mask component of party `id`.
    pub fn set_alpha(&mut self, id: PartyId, value: u64) {
        self.alpha[id.index()] = value;
    }

    /// All five mask components, indexed by [`PartyId::index`].
    pub fn alphas(&self) -> &[u64; PARTIES] {
        &self.alpha
    }

    /// The masked value.
    pub fn beta(&self) -> u64 {
        self.beta
    }

    /// Overwrites the masked value.
    pub fn set_beta(&mut self, beta: u64) {
        self.beta = beta;
    }

    /// The wrapping sum of all mask components.
    pub fn alpha_sum(&self) -> u64 {
        self.alpha.iter().fold(0, |acc, a| acc.wrapping_add(*a))
    }

    /// The XOR of all mask components, the boolean analog of [`Self::alpha_sum`].
    pub fn alpha_xor(&self) -> u64 {
        self.alpha.iter().fold(0, |acc, a| acc ^ a)
    }

    /// Returns a copy with the holder's own mask component cleared.
    pub fn without_own(mut self, me: PartyId) -> Self {
        self.alpha[me.index()] = 0;
        self
    }

    /// Component-wise sum, a share of `x + y`.
    pub fn add(&self, other: &Self) -> Self {
        Self {
            alpha: zip_with(&self.alpha, &other.alpha, u64::wrapping_add),
            beta: self.beta.wrapping_add(other.beta),
        }
    }

    /// Component-wise difference, a share of `x - y`.
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            alpha: zip_with(&self.alpha, &other.alpha, u64::wrapping_sub),
            beta: self.beta.wrapping_sub(other.beta),
        }
    }

    /// A share of `-x`.
    pub fn neg(&self) -> Self {
        Self {
            alpha: self.alpha.map(u64::wrapping_neg),
            beta: self.beta.wrapping_neg(),
        }
    }

    /// A share of `x + c` for a public `c`.
    pub fn add_public(&self, c: u64) -> Self {
        Self {
            alpha: self.alpha,
            beta: self.beta.wrapping_add(c),
        }
    }

    /// A share of `c · x` for a public `c`.
    pub fn scale(&self, c: u64) -> Self {
        Self {
            alpha: self.alpha.map(|a| a.wrapping_mul(c)),
            beta: self.beta.wrapping_mul(c),
        }
    }

    /// Boolean ring: a share of `x ⊕ y`.
    pub fn xor(&self, other: &Self) -> Self {
        Self {
            alpha: zip_with(&self.alpha, &other.alpha, |a, b| a ^ b),
            beta: self.beta ^ other.beta,
        }
    }

    /// Boolean ring: a share of `x ⊕ c` for a public `c`.
    pub fn xor_public(&self, c: u64) -> Self {
        Self {
            alpha: self.alpha,
            beta: self.beta ^ c,
        }
    }

    /// Boolean ring: a share of `x ∧ c` for a public `c`.
    pub fn and_public(&self, c: u64) -> Self {
        Self {
            alpha: self.alpha.map(|a| a & c),
            beta: self.beta & c,
        }
    }

    /// `BetaToAdditive`: party 1's slot absorbs `beta`, all other slots hold `-alpha_i`.
    pub fn to_additive(&self, me: PartyId) -> AdditiveShare {
        let mut slots = [0; PARTIES];
        if me != PartyId::P1 {
            slots[0] = self.beta.wrapping_sub(self.alpha[0]);
        }
        for id in PartyId::ALL.into_iter().skip(1) {
            if id != me {
                slots[id.index()] = self.alpha[id.index()].wrapping_neg();
            }
        }
        AdditiveShare(slots)
    }

    /// `BitBetaToAdditive`: the boolean counterpart of [`Self::to_additive`].
    pub fn to_bit_additive(&self, me: PartyId) -> AdditiveShare {
        let mut slots = [0; PARTIES];
        if me != PartyId::P1 {
            slots[0] = self.beta ^ self.alpha[0];
        }
        for id in PartyId::ALL.into_iter().skip(1) {
            if id != me {
                slots[id.index()] = self.alpha[id.index()];
            }
        }
        AdditiveShare(slots)
    }
}

/// A 5-way additive decomposition of a secret. Slot `i` is known to all parties except `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdditiveShare([u64; PARTIES]);

impl AdditiveShare {
    /// Creates an additive share from raw slots, clearing the holder's own slot.
    pub fn new(mut slots: [u64; PARTIES], me: PartyId) -> Self {
        slots[me.index()] = 0;
        Self(slots)
    }

    /// A share that is zero everywhere except in `slot`, which holds `value` for every party
    /// that is allowed to know it.
    pub fn single(slot: PartyId, value: u64, me: PartyId) -> Self {
        let mut slots = [0; PARTIES];
        if slot != me {
            slots[slot.index()] = value;
        }
        Self(slots)
    }

    /// The component of party `id`.
    pub fn get(&self, id: PartyId) -> u64 {
        self.0[id.index()]
    }

    /// Overwrites the component of party `id`.
    pub fn set(&mut self, id: PartyId, value: u64) {
        self.0[id.index()] = value;
    }

    /// The raw slots, indexed by [`PartyId::index`].
    pub fn slots(&self) -> &[u64; PARTIES] {
        &self.0
    }

    /// Adds two additive shares, skipping the holder's own slot.
    pub fn add(&self, other: &Self, me: PartyId) -> Self {
        let mut slots = zip_with(&self.0, &other.0, u64::wrapping_add);
        slots[me.index()] = 0;
        Self(slots)
    }

    /// `AdditiveToBeta`: `alpha_i = -slot_i` and `beta = 0`.
    pub fn to_beta(&self, me: PartyId) -> ReplicatedShare {
        ReplicatedShare::new(self.0.map(u64::wrapping_neg), 0).without_own(me)
    }

    /// `BitAdditiveToBeta`: `alpha_i = slot_i` and `beta = 0` in the boolean ring.
    pub fn to_bit_beta(&self, me: PartyId) -> ReplicatedShare {
        ReplicatedShare::new(self.0, 0).without_own(me)
    }
}

fn zip_with(
    a: &[u64; PARTIES],
    b: &[u64; PARTIES],
    f: impl Fn(u64, u64) -> u64,
) -> [u64; PARTIES] {
    std::array::from_fn(|i| f(a[i], b[i]))
}

/// Combines the views of all five parties into the secret they share.
///
/// Mask component `i` is taken from a party other than `i`, `beta` from party 1. Only meaningful
/// in tests and simulations where all views are available in one place.
pub fn reveal(views: &[ReplicatedShare; PARTIES]) -> u64 {
    let alpha_sum = PartyId::ALL.iter().fold(0u64, |acc, &id| {
        let holder = if id == PartyId::P1 { PartyId::P2 } else { PartyId::P1 };
        acc.wrapping_add(views[holder.index()].alpha(id))
    });
    views[0].beta().wrapping_sub(alpha_sum)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn views_of(alpha: [u64; PARTIES], value: u64) -> [ReplicatedShare; PARTIES] {
        let beta = alpha
            .iter()
            .fold(value, |acc, a| acc.wrapping_add(*a));
        PartyId::ALL.map(|me| ReplicatedShare::new(alpha, beta).without_own(me))
    }

    #[test]
    fn party_ids_are_validated() {
        assert!(PartyId::new(0).is_err());
        assert!(PartyId::new(6).is_err());
        assert_eq!(PartyId::new(3), Ok(PartyId::P3));
        assert_eq!(PartyId::P4.others().count(), 4);
        assert!(PartyId::P4.others().all(|p| p != PartyId::P4));
    }

    #[test]
    fn public_constants_reveal_their_value() {
        let views = PartyId::ALL.map(|_| ReplicatedShare::public(77));
        assert_eq!(reveal(&views), 77);
    }

    #[test]
    fn own_slot_stays_zero_after_conversion() {
        let share = ReplicatedShare::new([5, 6, 7, 8, 9], 100);
        for me in PartyId::ALL {
            let share = share.without_own(me);
            assert_eq!(share.to_additive(me).get(me), 0);
            assert_eq!(share.to_bit_additive(me).get(me), 0);
            assert_eq!(share.to_additive(me).to_beta(me).alpha(me), 0);
        }
    }

    proptest! {
        #[test]
        fn additive_to_beta_round_trips(slots in any::<[u64; PARTIES]>()) {
            for me in PartyId::ALL {
                let additive = AdditiveShare::new(slots, me);
                prop_assert_eq!(additive.to_beta(me).to_additive(me), additive);
                prop_assert_eq!(additive.to_bit_beta(me).to_bit_additive(me), additive);
            }
        }

        #[test]
        fn beta_to_additive_preserves_the_secret(
            alpha in any::<[u64; PARTIES]>(),
            value in any::<u64>(),
        ) {
            let views = views_of(alpha, value);
            let additive = PartyId::ALL.map(|me| views[me.index()].to_additive(me));
            let mut slots = [0u64; PARTIES];
            for id in PartyId::ALL {
                let holder = if id == PartyId::P1 { PartyId::P2 } else { PartyId::P1 };
                slots[id.index()] = additive[holder.index()].get(id);
            }
            let sum = slots.iter().fold(0u64, |acc, s| acc.wrapping_add(*s));
            prop_assert_eq!(sum, value);

            let back = PartyId::ALL.map(|me| additive[me.index()].to_beta(me));
            prop_assert_eq!(reveal(&back), value);
        }

        #[test]
        fn local_arithmetic_matches_plaintext(
            a in any::<[u64; PARTIES]>(),
            b in any::<[u64; PARTIES]>(),
            x in any::<u64>(),
            y in any::<u64>(),
            c in any::<u64>(),
        ) {
            let xs = views_of(a, x);
            let ys = views_of(b, y);
            let sum = PartyId::ALL.map(|p| xs[p.index()].add(&ys[p.index()]));
            let diff = PartyId::ALL.map(|p| xs[p.index()].sub(&ys[p.index()]));
            let scaled = PartyId::ALL.map(|p| xs[p.index()].scale(c).add_public(c));
            prop_assert_eq!(reveal(&sum), x.wrapping_add(y));
            prop_assert_eq!(reveal(&diff), x.wrapping_sub(y));
            prop_assert_eq!(reveal(&scaled), x.wrapping_mul(c).wrapping_add(c));
        }
    }
}
