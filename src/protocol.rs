//! The 5-party protocols, from input sharing up to ReLU, and a local simulation harness.
//!
//! Every protocol is a free async function operating on a [`Node`]. The functions reserve their
//! operation ids from the node, so all five parties must call the same functions in the same
//! order for a task, including the ones where a party only sends or only receives.
use std::{future::Future, sync::Arc};

use futures::future::try_join_all;
use tokio::{sync::AcquireError, task::JoinError};

use crate::{
    channel::{self, LocalTransport, TaskId, Transport},
    node::{Node, StoreError},
    prf::{Prf, SessionKey},
    share::{PARTIES, PartyId},
};

pub mod a2b;
pub mod b2a;
pub mod dot;
pub mod linear;
pub mod mul;
pub mod reconstruction;
pub mod relu;
pub mod sharing;
pub mod truncation;

/// A custom error type for protocol execution and communication.
#[derive(Debug)]
pub enum Error {
    /// A message could not be sent or received.
    Channel(channel::Error),
    /// A protocol step was invoked before the step producing its inputs.
    Store(StoreError),
    /// The roles passed to a protocol are inconsistent (duplicates, target among informants).
    InvalidRoles(&'static str),
    /// The party cannot take the role it was asked to take.
    WrongRole(PartyId),
    /// The operands of a vector operation differ in length.
    DimensionMismatch {
        /// Length of the left operand.
        left: usize,
        /// Length of the right operand.
        right: usize,
    },
    /// The masks of a task were already consumed by an earlier run.
    TaskReused(TaskId),
    /// A spawned protocol task panicked or was cancelled.
    Join(JoinError),
    /// The worker pool was closed while tasks were waiting for it.
    Pool(AcquireError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Channel(e) => write!(f, "Channel error: {e}"),
            Error::Store(e) => write!(f, "Store error: {e}"),
            Error::InvalidRoles(msg) => write!(f, "Invalid roles: {msg}"),
            Error::WrongRole(p) => write!(f, "Party {p} cannot take this role"),
            Error::DimensionMismatch { left, right } => {
                write!(f, "Operand lengths differ: {left} vs {right}")
            }
            Error::TaskReused(task) => write!(f, "Task {task} was already run"),
            Error::Join(e) => write!(f, "Protocol task failed: {e}"),
            Error::Pool(e) => write!(f, "Worker pool closed: {e}"),
        }
    }
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        Self::Channel(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Self::Join(e)
    }
}

impl From<AcquireError> for Error {
    fn from(e: AcquireError) -> Self {
        Self::Pool(e)
    }
}

/// Checks that `parties` are pairwise distinct.
pub(crate) fn distinct(parties: &[PartyId], msg: &'static str) -> Result<(), Error> {
    for (i, p) in parties.iter().enumerate() {
        if parties[i + 1..].contains(p) {
            return Err(Error::InvalidRoles(msg));
        }
    }
    Ok(())
}

/// Runs `f` as task `task` on all five parties of a fresh in-process network.
///
/// Returns the results in party order.
pub async fn simulate<O, F, Fut>(task: TaskId, f: F) -> Result<Vec<O>, Error>
where
    F: Fn(Node<LocalTransport>) -> Fut,
    Fut: Future<Output = Result<O, Error>> + Send + 'static,
    O: Send + 'static,
{
    simulate_on(&LocalTransport::network(), task, &SessionKey::default(), f).await
}

/// Runs `f` as task `task` on the given transports, one per party in party order.
///
/// If one party fails, all transports are stopped so that the other parties do not wait for
/// messages that never arrive.
pub async fn simulate_on<T, O, F, Fut>(
    transports: &[Arc<T>; PARTIES],
    task: TaskId,
    key: &SessionKey,
    f: F,
) -> Result<Vec<O>, Error>
where
    T: Transport + 'static,
    F: Fn(Node<T>) -> Fut,
    Fut: Future<Output = Result<O, Error>> + Send + 'static,
    O: Send + 'static,
{
    let prf = Prf::new(key);
    let handles = PartyId::ALL.map(|id| {
        let run = f(Node::new(
            id,
            task,
            transports[id.index()].clone(),
            prf.clone(),
        ));
        let transports = transports.clone();
        tokio::spawn(async move {
            let result = run.await;
            if result.is_err() {
                for transport in &transports {
                    transport.stop();
                }
            }
            result
        })
    });
    try_join_all(handles).await?.into_iter().collect()
}
