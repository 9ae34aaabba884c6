//! Multiplication of two shared values, generic over the ring.
//!
//! For `x = βx - Ax` and `y = βy - Ay` the product expands to
//! `βxβy - βx·Ay - βy·Ax + Ax·Ay`. Only `Ax·Ay` needs interaction: every cross term
//! `αx_r·αy_z` is known to the three parties other than `r` and `z`, who turn it into an additive
//! share with a single relayed correction (one sharing condition per ordered pair). This happens
//! offline, before the inputs are known. The online phase then needs a single round in which
//! every party learns the one slot of the masked product it cannot compute itself.
use tracing::{Level, debug, instrument};

use super::{
    Error,
    sharing::{condition_correction, condition_mask},
};
use crate::{
    channel::{TaskContext, Transport},
    conditions::{
        CONDITIONS, DIAGONAL_ROUTES, conditions, conditions_for_receiver, relay_informants,
    },
    node::Node,
    ring::Ring,
    share::{PARTIES, PartyId, ReplicatedShare},
};

/// Operation ids used by the offline phase.
pub const OFFLINE_OPS: u32 = CONDITIONS as u32;

/// Operation ids used by the online phase.
pub const ONLINE_OPS: u32 = PARTIES as u32;

/// The input-independent part of a multiplication: an additive share of `Ax·Ay` and the mask
/// of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulPreparation {
    alpha_xy: [u64; PARTIES],
    alpha_z: [u64; PARTIES],
}

type Matrix = [[u64; PARTIES]; PARTIES];

/// The cross terms `M(r, z) = Σ αx_r·αy_z` this party can compute, with the diagonal terms
/// routed into their cells.
fn cross_terms<R: Ring>(me: PartyId, pairs: &[(ReplicatedShare, ReplicatedShare)]) -> Matrix {
    let mut matrix = Matrix::default();
    for row in me.others() {
        for col in me.others().filter(|c| *c != row) {
            let cell = R::sum(pairs.iter().map(|(x, y)| R::mul(x.alpha(row), y.alpha(col))));
            matrix[row.index()][col.index()] = cell;
        }
    }
    for route in DIAGONAL_ROUTES.iter().filter(|r| r.accumulated_by(me)) {
        let term = route.term;
        let diagonal = R::sum(pairs.iter().map(|(x, y)| R::mul(x.alpha(term), y.alpha(term))));
        let cell = &mut matrix[route.row.index()][route.col.index()];
        *cell = R::add(*cell, diagonal);
    }
    matrix
}

/// An offline phase whose corrections have been sent but not yet received.
#[derive(Debug)]
struct PendingPreparation {
    ctx: TaskContext,
    shares: [[u64; PARTIES]; CONDITIONS],
}

/// An online phase whose relays have been sent but not yet received.
#[derive(Debug)]
struct PendingProduct {
    ctx: TaskContext,
    alpha_z: [u64; PARTIES],
    beta_z: [u64; PARTIES],
    public: u64,
}

fn send_preparation<R: Ring, T: Transport>(
    node: &mut Node<T>,
    pairs: &[(ReplicatedShare, ReplicatedShare)],
) -> Result<PendingPreparation, Error> {
    let ctx = node.reserve_ops(OFFLINE_OPS);
    let me = node.id();
    let matrix = cross_terms::<R>(me, pairs);
    let mut shares = [[0u64; PARTIES]; CONDITIONS];
    for (c, condition) in conditions().iter().enumerate() {
        let mut mask = condition_mask::<R, T>(node, ctx, condition, (PARTIES * c) as u64);
        if condition.is_sender(me) {
            let cell = matrix[condition.receiver.index()][condition.zero_holder.index()];
            let correction = condition_correction::<R>(condition, &mask, cell);
            mask[condition.zero_holder.index()] = correction;
            node.send(condition.receiver, ctx.offset(c as u32), correction)?;
        }
        shares[c] = mask;
    }
    Ok(PendingPreparation { ctx, shares })
}

async fn receive_preparation<R: Ring, T: Transport>(
    node: &Node<T>,
    pending: PendingPreparation,
) -> Result<MulPreparation, Error> {
    let PendingPreparation { ctx, mut shares } = pending;
    let me = node.id();
    for &(c, zero_holder) in conditions_for_receiver(me) {
        shares[c][zero_holder.index()] = node.receive(ctx.offset(c as u32), 3).await?;
    }
    let mut alpha_xy = [0u64; PARTIES];
    let mut alpha_z = [0u64; PARTIES];
    for id in me.others() {
        alpha_xy[id.index()] = R::sum(shares.iter().map(|s| s[id.index()]));
        alpha_z[id.index()] =
            R::reduce(node.mask(ctx, id.get() as u64 + (PARTIES * CONDITIONS) as u64));
    }
    Ok(MulPreparation { alpha_xy, alpha_z })
}

fn send_product<R: Ring, T: Transport>(
    node: &mut Node<T>,
    prep: &MulPreparation,
    pairs: &[(ReplicatedShare, ReplicatedShare)],
) -> Result<PendingProduct, Error> {
    let ctx = node.reserve_ops(ONLINE_OPS);
    let me = node.id();
    let mut beta_z = [0u64; PARTIES];
    for id in me.others() {
        let masked = R::add(prep.alpha_xy[id.index()], prep.alpha_z[id.index()]);
        let cross = R::sum(pairs.iter().map(|(x, y)| {
            R::add(
                R::mul(x.beta(), y.alpha(id)),
                R::mul(y.beta(), x.alpha(id)),
            )
        }));
        beta_z[id.index()] = R::sub(masked, cross);
    }
    for target in me.others() {
        if relay_informants(target).contains(&me) {
            node.send(target, ctx.offset(target.index() as u32), beta_z[target.index()])?;
        }
    }
    let public = R::sum(pairs.iter().map(|(x, y)| R::mul(x.beta(), y.beta())));
    Ok(PendingProduct {
        ctx,
        alpha_z: prep.alpha_z,
        beta_z,
        public,
    })
}

async fn receive_product<R: Ring, T: Transport>(
    node: &Node<T>,
    pending: PendingProduct,
) -> Result<ReplicatedShare, Error> {
    let PendingProduct {
        ctx,
        alpha_z,
        mut beta_z,
        public,
    } = pending;
    let me = node.id();
    beta_z[me.index()] = node.receive(ctx.offset(me.index() as u32), 3).await?;
    let beta = R::add(R::sum(beta_z), public);
    Ok(ReplicatedShare::new(alpha_z, beta).without_own(me))
}

/// Runs the offline phase for the products of all `pairs`, summed up.
///
/// A single pair is a multiplication, several pairs a dot product. Uses 20 operation ids.
pub async fn prepare<R: Ring, T: Transport>(
    node: &mut Node<T>,
    pairs: &[(ReplicatedShare, ReplicatedShare)],
) -> Result<MulPreparation, Error> {
    let pending = send_preparation::<R, T>(node, pairs)?;
    let op = pending.ctx.op;
    let prep = receive_preparation::<R, T>(node, pending).await?;
    debug!(party = %node.id(), op, terms = pairs.len(), "prepared multiplication");
    Ok(prep)
}

/// Runs the online phase: computes the masked product of all `pairs`, summed up.
///
/// Every slot of the masked product is relayed to the party it belongs to by three parties,
/// so a single wrong relay is outvoted. Uses 5 operation ids.
pub async fn combine<R: Ring, T: Transport>(
    node: &mut Node<T>,
    prep: &MulPreparation,
    pairs: &[(ReplicatedShare, ReplicatedShare)],
) -> Result<ReplicatedShare, Error> {
    let pending = send_product::<R, T>(node, prep, pairs)?;
    receive_product::<R, T>(node, pending).await
}

/// Computes the element-wise products of independent `pairs` in one offline and one online
/// round.
pub async fn multiply_all<R: Ring, T: Transport>(
    node: &mut Node<T>,
    pairs: &[(ReplicatedShare, ReplicatedShare)],
) -> Result<Vec<ReplicatedShare>, Error> {
    let mut pending = Vec::with_capacity(pairs.len());
    for pair in pairs {
        pending.push(send_preparation::<R, T>(node, std::slice::from_ref(pair))?);
    }
    let mut preps = Vec::with_capacity(pairs.len());
    for p in pending {
        preps.push(receive_preparation::<R, T>(node, p).await?);
    }
    let mut pending = Vec::with_capacity(pairs.len());
    for (prep, pair) in preps.iter().zip(pairs) {
        pending.push(send_product::<R, T>(node, prep, std::slice::from_ref(pair))?);
    }
    let mut products = Vec::with_capacity(pairs.len());
    for p in pending {
        products.push(receive_product::<R, T>(node, p).await?);
    }
    Ok(products)
}

/// Multiplies two shares, offline and online phase in one call.
pub async fn multiply<R: Ring, T: Transport>(
    node: &mut Node<T>,
    x: &ReplicatedShare,
    y: &ReplicatedShare,
) -> Result<ReplicatedShare, Error> {
    let pairs = [(*x, *y)];
    let prep = prepare::<R, T>(node, &pairs).await?;
    combine::<R, T>(node, &prep, &pairs).await
}

/// Offline phase of `z = x · y` for stored shares. The preparation is kept under `z`.
pub async fn mul_offline<R: Ring, T: Transport>(
    node: &mut Node<T>,
    x: u32,
    y: u32,
    z: u32,
) -> Result<(), Error> {
    let pairs = [(node.beta_share(x)?, node.beta_share(y)?)];
    let prep = prepare::<R, T>(node, &pairs).await?;
    node.set_mul_preparation(z, prep);
    Ok(())
}

/// Online phase of `z = x · y` for stored shares.
///
/// Boolean products are additionally stored in additive form.
pub async fn mul_online<R: Ring, T: Transport>(
    node: &mut Node<T>,
    x: u32,
    y: u32,
    z: u32,
) -> Result<ReplicatedShare, Error> {
    let pairs = [(node.beta_share(x)?, node.beta_share(y)?)];
    let prep = node.take_mul_preparation(z)?;
    let product = combine::<R, T>(node, &prep, &pairs).await?;
    node.set_beta_share(z, product);
    if R::BOOLEAN {
        node.set_additive_share(z, R::to_additive(&product, node.id()));
    }
    Ok(product)
}

/// Stores a share of `x · y` under `z`.
#[instrument(level = Level::DEBUG, skip(node), fields(party = %node.id()), err)]
pub async fn mul<R: Ring, T: Transport>(
    node: &mut Node<T>,
    x: u32,
    y: u32,
    z: u32,
) -> Result<ReplicatedShare, Error> {
    mul_offline::<R, T>(node, x, y, z).await?;
    mul_online::<R, T>(node, x, y, z).await
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::ring::{Gf2, Z64};

    fn full_share(rng: &mut ChaCha20Rng, mask: u64) -> ReplicatedShare {
        ReplicatedShare::new(std::array::from_fn(|_| rng.random::<u64>() & mask), 0)
    }

    fn cells_cover_the_mask_product<R: Ring>(mask: u64) {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let pairs: Vec<_> = (0..3)
            .map(|_| (full_share(&mut rng, mask), full_share(&mut rng, mask)))
            .collect();
        let matrices = PartyId::ALL.map(|me| cross_terms::<R>(me, &pairs));
        let mut total = 0;
        for condition in conditions() {
            let (r, z) = (condition.receiver.index(), condition.zero_holder.index());
            let cells: Vec<_> = condition
                .senders
                .iter()
                .map(|s| matrices[s.index()][r][z])
                .collect();
            assert!(cells.windows(2).all(|w| w[0] == w[1]));
            total = R::add(total, cells[0]);
        }
        let expected = R::sum(pairs.iter().map(|(x, y)| {
            R::mul(R::sum(*x.alphas()), R::sum(*y.alphas()))
        }));
        assert_eq!(total, expected);
    }

    #[test]
    fn senders_agree_and_cells_cover_the_product() {
        cells_cover_the_mask_product::<Z64>(u64::MAX);
        cells_cover_the_mask_product::<Gf2>(1);
    }
}
