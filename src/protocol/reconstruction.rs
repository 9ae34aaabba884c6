//! Opening shares to a single party.
//!
//! The target misses exactly one mask component, its own. Three informants send it, and the
//! target keeps the majority, so one lying informant cannot change the result.
use tracing::trace;

use super::{Error, distinct};
use crate::{
    channel::Transport,
    node::Node,
    ring::Ring,
    share::{PartyId, ReplicatedShare},
};

/// Opens `share` to `target` with the help of three `informants`.
///
/// Returns the value at the target and `None` everywhere else. In the arithmetic ring, the
/// target records a borrow (`beta < Σalpha`) in the node's wrap flag.
pub async fn open<R: Ring, T: Transport>(
    node: &mut Node<T>,
    share: &ReplicatedShare,
    informants: [PartyId; 3],
    target: PartyId,
) -> Result<Option<u64>, Error> {
    distinct(&informants, "informants must be distinct")?;
    if informants.contains(&target) {
        return Err(Error::InvalidRoles("target cannot inform itself"));
    }
    let ctx = node.reserve_ops(1);
    let me = node.id();
    if informants.contains(&me) {
        node.send(target, ctx, share.alpha(target))?;
        return Ok(None);
    }
    if me != target {
        return Ok(None);
    }
    let mut full = *share;
    full.set_alpha(me, node.receive(ctx, 3).await?);
    let alpha_sum = R::sum(*full.alphas());
    let value = R::sub(full.beta(), alpha_sum);
    if !R::BOOLEAN && full.beta() < alpha_sum {
        node.set_truncation_wrap(true);
    }
    trace!(party = %me, op = ctx.op, "opened value");
    Ok(Some(value))
}

/// Opens `beta_shares[key]` to `target` and stores the value under `values[key]` there.
pub async fn reconstruct<R: Ring, T: Transport>(
    node: &mut Node<T>,
    key: u32,
    informants: [PartyId; 3],
    target: PartyId,
) -> Result<Option<u64>, Error> {
    let share = node.beta_share(key)?;
    let value = open::<R, T>(node, &share, informants, target).await?;
    if let Some(value) = value {
        node.set_value(key, value);
    }
    Ok(value)
}

/// The default informants for opening a value to `target`: the three lowest other parties.
pub fn default_informants(target: PartyId) -> [PartyId; 3] {
    let mut others = target.others();
    let mut next = || others.next().unwrap_or(target);
    [next(), next(), next()]
}
