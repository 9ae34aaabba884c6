//! Ring policies shared by the arithmetic and boolean variants of the protocols.
//!
//! The multiplication, sharing and reconstruction protocols run the same control flow over two
//! different rings. Instead of duplicating them, they are generic over a [`Ring`] which is
//! resolved at compile time.
use crate::share::{AdditiveShare, PartyId, ReplicatedShare};

/// The operations a protocol needs from the ring its shares live in.
pub trait Ring: Send + Sync + 'static {
    /// Whether this is the boolean ring, whose results are also folded into additive form.
    const BOOLEAN: bool;

    /// Ring addition.
    fn add(a: u64, b: u64) -> u64;

    /// Ring subtraction.
    fn sub(a: u64, b: u64) -> u64;

    /// Ring multiplication.
    fn mul(a: u64, b: u64) -> u64;

    /// Maps an arbitrary PRF output to a uniformly random ring element.
    fn reduce(v: u64) -> u64;

    /// Sums up all `values`.
    fn sum(values: impl IntoIterator<Item = u64>) -> u64 {
        values.into_iter().fold(0, Self::add)
    }

    /// Converts a replicated share into additive form.
    fn to_additive(share: &ReplicatedShare, me: PartyId) -> AdditiveShare;

    /// Converts an additive share into replicated form.
    fn to_beta(share: &AdditiveShare, me: PartyId) -> ReplicatedShare;
}

/// The ring of integers modulo `2^64`.
#[derive(Debug, Clone, Copy)]
pub struct Z64;

/// The binary field, with values stored in the lowest bit.
#[derive(Debug, Clone, Copy)]
pub struct Gf2;

impl Ring for Z64 {
    const BOOLEAN: bool = false;

    fn add(a: u64, b: u64) -> u64 {
        a.wrapping_add(b)
    }

    fn sub(a: u64, b: u64) -> u64 {
        a.wrapping_sub(b)
    }

    fn mul(a: u64, b: u64) -> u64 {
        a.wrapping_mul(b)
    }

    fn reduce(v: u64) -> u64 {
        v
    }

    fn to_additive(share: &ReplicatedShare, me: PartyId) -> AdditiveShare {
        share.to_additive(me)
    }

    fn to_beta(share: &AdditiveShare, me: PartyId) -> ReplicatedShare {
        share.to_beta(me)
    }
}

impl Ring for Gf2 {
    const BOOLEAN: bool = true;

    fn add(a: u64, b: u64) -> u64 {
        a ^ b
    }

    fn sub(a: u64, b: u64) -> u64 {
        a ^ b
    }

    fn mul(a: u64, b: u64) -> u64 {
        a & b
    }

    fn reduce(v: u64) -> u64 {
        v & 1
    }

    fn to_additive(share: &ReplicatedShare, me: PartyId) -> AdditiveShare {
        share.to_bit_additive(me)
    }

    fn to_beta(share: &AdditiveShare, me: PartyId) -> ReplicatedShare {
        share.to_bit_beta(me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gf2_is_xor_and_and() {
        for a in [0, 1] {
            for b in [0, 1] {
                assert_eq!(Gf2::add(a, b), a ^ b);
                assert_eq!(Gf2::sub(a, b), a ^ b);
                assert_eq!(Gf2::mul(a, b), a & b);
            }
        }
        assert_eq!(Gf2::reduce(0xfffe), 0);
        assert_eq!(Gf2::sum([1, 1, 1]), 1);
    }

    #[test]
    fn z64_wraps() {
        assert_eq!(Z64::add(u64::MAX, 2), 1);
        assert_eq!(Z64::sub(0, 1), u64::MAX);
        assert_eq!(Z64::mul(1 << 63, 2), 0);
        assert_eq!(Z64::sum([u64::MAX, u64::MAX]), u64::MAX - 1);
    }
}
