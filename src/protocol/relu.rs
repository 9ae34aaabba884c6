//! `ReLU(x) = x · (1 - msb(x))` over shared two's-complement values.
use tracing::{Level, instrument};

use super::{
    Error,
    a2b::{BITS, decompose},
    b2a::bit_to_arithmetic,
    mul::multiply,
};
use crate::{channel::Transport, node::Node, ring::Z64, share::ReplicatedShare};

/// Computes a share of `max(x, 0)`, reading `x` as a signed 64-bit value.
pub async fn relu_share<T: Transport>(
    node: &mut Node<T>,
    x: &ReplicatedShare,
) -> Result<ReplicatedShare, Error> {
    let bits = decompose(node, x).await?;
    let sign = bit_to_arithmetic(node, &bits[BITS - 1]).await?;
    let positive = sign.neg().add_public(1);
    multiply::<Z64, T>(node, x, &positive).await
}

/// Stores a share of `ReLU(x_key)` under `z_key`.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn relu<T: Transport>(
    node: &mut Node<T>,
    x_key: u32,
    z_key: u32,
) -> Result<ReplicatedShare, Error> {
    let x = node.beta_share(x_key)?;
    let z = relu_share(node, &x).await?;
    node.set_beta_share(z_key, z);
    Ok(z)
}
