//! The per-task state of one party: its share store, operation counter and transport handle.
use std::{collections::HashMap, ops::Range, sync::Arc};

use thiserror::Error;
use tracing::trace;

use crate::{
    channel::{self, OpId, TaskContext, TaskId, Transport},
    prf::Prf,
    protocol::{mul::MulPreparation, truncation::TruncationMask},
    share::{AdditiveShare, PartyId, ReplicatedShare},
};

/// A lookup in the share store failed, the caller invoked protocol steps out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No plaintext value under this key.
    #[error("no plaintext value stored under key {0}")]
    MissingValue(u32),
    /// No replicated share under this key.
    #[error("no replicated share stored under key {0}")]
    MissingBetaShare(u32),
    /// No additive share under this key.
    #[error("no additive share stored under key {0}")]
    MissingAdditiveShare(u32),
    /// The offline phase of the multiplication producing this key did not run.
    #[error("no prepared multiplication for output key {0}")]
    MissingMulPreparation(u32),
    /// No truncation mask under this key.
    #[error("no truncation mask stored under key {0}")]
    MissingTruncationMask(u8),
    /// No staged A2B bits under this key.
    #[error("no staged A2B bits stored under key {0}")]
    MissingA2bBits(u8),
}

/// One party's state for a single task.
///
/// A node is never shared between concurrently running tasks. Tasks that need the same inputs
/// (for example the weights of a layer) copy them in with [`Node::import_beta_shares`].
#[derive(Debug)]
pub struct Node<T> {
    id: PartyId,
    task: TaskId,
    next_op: OpId,
    transport: Arc<T>,
    prf: Prf,
    values: HashMap<u32, u64>,
    beta_shares: HashMap<u32, ReplicatedShare>,
    additive_shares: HashMap<u32, AdditiveShare>,
    mul_shares: HashMap<u32, MulPreparation>,
    truncation_params: HashMap<u8, TruncationMask>,
    a2b_shares: HashMap<u8, Vec<AdditiveShare>>,
    truncation_wrap: bool,
}

impl<T> Node<T> {
    /// Creates an empty node for `task`, owned by party `id`.
    pub fn new(id: PartyId, task: TaskId, transport: Arc<T>, prf: Prf) -> Self {
        Self {
            id,
            task,
            next_op: 0,
            transport,
            prf,
            values: HashMap::new(),
            beta_shares: HashMap::new(),
            additive_shares: HashMap::new(),
            mul_shares: HashMap::new(),
            truncation_params: HashMap::new(),
            a2b_shares: HashMap::new(),
            truncation_wrap: false,
        }
    }

    /// The party this node belongs to.
    pub fn id(&self) -> PartyId {
        self.id
    }

    /// The task this node runs.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The transport used by this node.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The PRF used by this node.
    pub fn prf(&self) -> &Prf {
        &self.prf
    }

    /// Reserves `n` consecutive operation ids and returns the context of the first one.
    ///
    /// All parties run the same sequence of protocol steps for a task, so their counters stay
    /// in lockstep without any coordination.
    pub fn reserve_ops(&mut self, n: u32) -> TaskContext {
        let ctx = TaskContext::new(self.task, self.next_op);
        self.next_op += n;
        ctx
    }

    /// Evaluates the PRF in the domain of `ctx`.
    pub(crate) fn mask(&self, ctx: TaskContext, input: u64) -> u64 {
        self.prf.eval_tweaked(ctx.tweak(), input)
    }

    /// The plaintext value stored under `key`.
    pub fn value(&self, key: u32) -> Result<u64, StoreError> {
        self.values
            .get(&key)
            .copied()
            .ok_or(StoreError::MissingValue(key))
    }

    /// Stores a plaintext value.
    pub fn set_value(&mut self, key: u32, value: u64) {
        self.values.insert(key, value);
    }

    /// All plaintext values known to this node.
    pub fn values(&self) -> &HashMap<u32, u64> {
        &self.values
    }

    /// The replicated share stored under `key`.
    pub fn beta_share(&self, key: u32) -> Result<ReplicatedShare, StoreError> {
        self.beta_shares
            .get(&key)
            .copied()
            .ok_or(StoreError::MissingBetaShare(key))
    }

    /// Stores a replicated share, clearing the own mask component.
    pub fn set_beta_share(&mut self, key: u32, share: ReplicatedShare) {
        self.beta_shares.insert(key, share.without_own(self.id));
    }

    /// A copy of all replicated shares.
    pub fn beta_shares_snapshot(&self) -> HashMap<u32, ReplicatedShare> {
        self.beta_shares.clone()
    }

    /// Removes all replicated shares.
    pub fn reset_beta_shares(&mut self) {
        self.beta_shares.clear();
    }

    /// Copies the shares with keys in `keys` from a read-only snapshot.
    pub fn import_beta_shares(
        &mut self,
        source: &HashMap<u32, ReplicatedShare>,
        keys: Range<u32>,
    ) -> Result<(), StoreError> {
        for key in keys {
            let share = source
                .get(&key)
                .copied()
                .ok_or(StoreError::MissingBetaShare(key))?;
            self.set_beta_share(key, share);
        }
        Ok(())
    }

    /// The additive share stored under `key`.
    pub fn additive_share(&self, key: u32) -> Result<AdditiveShare, StoreError> {
        self.additive_shares
            .get(&key)
            .copied()
            .ok_or(StoreError::MissingAdditiveShare(key))
    }

    /// Stores an additive share, clearing the own slot.
    pub fn set_additive_share(&mut self, key: u32, share: AdditiveShare) {
        self.additive_shares
            .insert(key, AdditiveShare::new(*share.slots(), self.id));
    }

    pub(crate) fn set_mul_preparation(&mut self, key: u32, prep: MulPreparation) {
        self.mul_shares.insert(key, prep);
    }

    pub(crate) fn take_mul_preparation(&mut self, key: u32) -> Result<MulPreparation, StoreError> {
        self.mul_shares
            .remove(&key)
            .ok_or(StoreError::MissingMulPreparation(key))
    }

    /// The truncation mask stored under `key`.
    pub fn truncation_mask(&self, key: u8) -> Result<&TruncationMask, StoreError> {
        self.truncation_params
            .get(&key)
            .ok_or(StoreError::MissingTruncationMask(key))
    }

    /// Stores a truncation mask.
    pub fn set_truncation_mask(&mut self, key: u8, mask: TruncationMask) {
        self.truncation_params.insert(key, mask);
    }

    /// The staged per-bit boolean additive shares of an A2B conversion.
    pub fn a2b_bits(&self, key: u8) -> Result<&[AdditiveShare], StoreError> {
        self.a2b_shares
            .get(&key)
            .map(Vec::as_slice)
            .ok_or(StoreError::MissingA2bBits(key))
    }

    /// Stages the per-bit boolean additive shares of an A2B conversion.
    pub fn set_a2b_bits(&mut self, key: u8, bits: Vec<AdditiveShare>) {
        self.a2b_shares.insert(key, bits);
    }

    /// Whether a borrow was recorded since the flag was last consumed.
    pub fn truncation_wrap(&self) -> bool {
        self.truncation_wrap
    }

    /// Records (or clears) a borrow for the next right shift.
    pub fn set_truncation_wrap(&mut self, wrap: bool) {
        self.truncation_wrap = wrap;
    }

    /// Reads and resets the wrap flag.
    pub fn take_truncation_wrap(&mut self) -> bool {
        std::mem::take(&mut self.truncation_wrap)
    }
}

impl<T: Transport> Node<T> {
    /// Sends a value to another party.
    pub(crate) fn send(
        &self,
        to: PartyId,
        ctx: TaskContext,
        value: u64,
    ) -> Result<(), channel::Error> {
        self.transport.send(to, ctx, value)
    }

    /// Waits for `count` values addressed with `ctx`.
    pub(crate) async fn receive(
        &self,
        ctx: TaskContext,
        count: usize,
    ) -> Result<u64, channel::Error> {
        let value = self.transport.receive(ctx, count).await?;
        trace!(party = %self.id, task = ctx.task, op = ctx.op, count, "received");
        Ok(value)
    }

    /// Finishes the task and frees its mailbox.
    pub fn release(self) {
        self.transport.release_task(self.task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalTransport;

    fn node() -> Node<LocalTransport> {
        let [p1, ..] = LocalTransport::network();
        Node::new(PartyId::P1, 3, p1, Prf::default())
    }

    #[test]
    fn op_ids_are_reserved_in_sequence() {
        let mut node = node();
        assert_eq!(node.reserve_ops(20), TaskContext::new(3, 0));
        assert_eq!(node.reserve_ops(5), TaskContext::new(3, 20));
        assert_eq!(node.reserve_ops(1), TaskContext::new(3, 25));
    }

    #[test]
    fn missing_keys_are_sequencing_errors() {
        let node = node();
        assert_eq!(node.value(1), Err(StoreError::MissingValue(1)));
        assert_eq!(node.beta_share(2), Err(StoreError::MissingBetaShare(2)));
        assert!(matches!(
            node.truncation_mask(1),
            Err(StoreError::MissingTruncationMask(1))
        ));
    }

    #[test]
    fn own_slot_is_cleared_on_store() {
        let mut node = node();
        node.set_beta_share(1, ReplicatedShare::new([1, 2, 3, 4, 5], 6));
        assert_eq!(node.beta_share(1).map(|s| s.alpha(PartyId::P1)), Ok(0));
        node.set_additive_share(1, AdditiveShare::new([1, 2, 3, 4, 5], PartyId::P2));
        assert_eq!(node.additive_share(1).map(|s| s.get(PartyId::P1)), Ok(0));
    }

    #[test]
    fn wrap_flag_is_one_shot() {
        let mut node = node();
        node.set_truncation_wrap(true);
        assert!(node.take_truncation_wrap());
        assert!(!node.take_truncation_wrap());
        assert!(!node.truncation_wrap());
    }
}
