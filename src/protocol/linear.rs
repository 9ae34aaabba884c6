//! Local linear operations on stored shares. None of them communicate.
use crate::{
    node::{Node, StoreError},
    share::ReplicatedShare,
};

/// The two forms a stored value can be held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// A replicated share in `beta_shares`.
    Beta,
    /// An additive share in `additive_shares`.
    Additive,
}

/// Stores a share of `x + y` under `z`.
///
/// Both operands are converted to additive form, added slot by slot and converted back.
pub fn add<T>(node: &mut Node<T>, x: u32, y: u32, z: u32) -> Result<ReplicatedShare, StoreError> {
    let me = node.id();
    let a = node.beta_share(x)?.to_additive(me);
    let b = node.beta_share(y)?.to_additive(me);
    let sum = a.add(&b, me).to_beta(me);
    node.set_beta_share(z, sum);
    Ok(sum)
}

/// Stores a share of `x - y` under `z`.
pub fn sub<T>(node: &mut Node<T>, x: u32, y: u32, z: u32) -> Result<ReplicatedShare, StoreError> {
    let diff = node.beta_share(x)?.sub(&node.beta_share(y)?);
    node.set_beta_share(z, diff);
    Ok(diff)
}

/// Stores a share of `c · x + d` under `z`, for public `c` and `d`.
pub fn affine<T>(
    node: &mut Node<T>,
    x: u32,
    c: u64,
    d: u64,
    z: u32,
) -> Result<ReplicatedShare, StoreError> {
    let result = node.beta_share(x)?.scale(c).add_public(d);
    node.set_beta_share(z, result);
    Ok(result)
}

/// Converts the value under `key` into the requested form.
///
/// Converting to [`Representation::Additive`] reads the replicated share and writes the additive
/// store. Converting back reads the additive store. The two directions are exact inverses.
pub fn transform_sharing<T>(
    node: &mut Node<T>,
    key: u32,
    to: Representation,
) -> Result<(), StoreError> {
    let me = node.id();
    match to {
        Representation::Additive => {
            let share = node.beta_share(key)?.to_additive(me);
            node.set_additive_share(key, share);
        }
        Representation::Beta => {
            let share = node.additive_share(key)?.to_beta(me);
            node.set_beta_share(key, share);
        }
    }
    Ok(())
}

/// The boolean counterpart of [`transform_sharing`].
pub fn bit_transform_sharing<T>(
    node: &mut Node<T>,
    key: u32,
    to: Representation,
) -> Result<(), StoreError> {
    let me = node.id();
    match to {
        Representation::Additive => {
            let share = node.beta_share(key)?.to_bit_additive(me);
            node.set_additive_share(key, share);
        }
        Representation::Beta => {
            let share = node.additive_share(key)?.to_bit_beta(me);
            node.set_beta_share(key, share);
        }
    }
    Ok(())
}
