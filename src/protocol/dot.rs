//! Dot products with a single offline and a single online round, independent of the length.
use tracing::{Level, instrument};

use super::{
    Error,
    mul::{combine, prepare},
};
use crate::{channel::Transport, node::Node, ring::Ring, share::ReplicatedShare};

/// Two equally long ranges of stored shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotOperands {
    /// Key of the first element of the left vector.
    pub x_start: u32,
    /// Key of the first element of the right vector.
    pub y_start: u32,
    /// Number of elements.
    pub len: u32,
}

impl DotOperands {
    fn pairs<T>(&self, node: &Node<T>) -> Result<Vec<(ReplicatedShare, ReplicatedShare)>, Error> {
        (0..self.len)
            .map(|i| {
                Ok((
                    node.beta_share(self.x_start + i)?,
                    node.beta_share(self.y_start + i)?,
                ))
            })
            .collect()
    }
}

/// Computes a share of `Σ xs[i]·ys[i]`.
pub async fn dot<R: Ring, T: Transport>(
    node: &mut Node<T>,
    xs: &[ReplicatedShare],
    ys: &[ReplicatedShare],
) -> Result<ReplicatedShare, Error> {
    if xs.len() != ys.len() {
        return Err(Error::DimensionMismatch {
            left: xs.len(),
            right: ys.len(),
        });
    }
    let pairs: Vec<_> = xs.iter().copied().zip(ys.iter().copied()).collect();
    let prep = prepare::<R, T>(node, &pairs).await?;
    combine::<R, T>(node, &prep, &pairs).await
}

/// Offline phase of a dot product over stored shares. The preparation is kept under `z`.
pub async fn dot_product_offline<R: Ring, T: Transport>(
    node: &mut Node<T>,
    operands: DotOperands,
    z: u32,
) -> Result<(), Error> {
    let pairs = operands.pairs(node)?;
    let prep = prepare::<R, T>(node, &pairs).await?;
    node.set_mul_preparation(z, prep);
    Ok(())
}

/// Online phase of a dot product over stored shares, storing the result under `z`.
pub async fn dot_product_online<R: Ring, T: Transport>(
    node: &mut Node<T>,
    operands: DotOperands,
    z: u32,
) -> Result<ReplicatedShare, Error> {
    let pairs = operands.pairs(node)?;
    let prep = node.take_mul_preparation(z)?;
    let result = combine::<R, T>(node, &prep, &pairs).await?;
    node.set_beta_share(z, result);
    Ok(result)
}

/// Stores a share of the dot product of two stored vectors under `z`.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn dot_product<R: Ring, T: Transport>(
    node: &mut Node<T>,
    operands: DotOperands,
    z: u32,
) -> Result<ReplicatedShare, Error> {
    dot_product_offline::<R, T>(node, operands, z).await?;
    dot_product_online::<R, T>(node, operands, z).await
}
