//! The messaging layer used to exchange single ring elements between the five parties.
//!
//! Every value is addressed by a [`TaskContext`]: the task identifies one concurrent protocol
//! instance, the operation id one exchange inside it. Sending is fire-and-forget, receiving
//! blocks until the expected number of values for that exact address has arrived and then
//! combines them (identity for one value, majority vote for three).
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::share::{PARTIES, PartyId};

/// Identifies one concurrent protocol instance.
pub type TaskId = u32;

/// Identifies one value exchange within a task.
pub type OpId = u32;

/// The logical address of a value exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskContext {
    /// The task the exchange belongs to.
    pub task: TaskId,
    /// The operation within the task.
    pub op: OpId,
}

impl TaskContext {
    /// Creates a new context.
    pub const fn new(task: TaskId, op: OpId) -> Self {
        Self { task, op }
    }

    /// The context `n` operations after this one.
    pub const fn offset(self, n: u32) -> Self {
        Self {
            task: self.task,
            op: self.op + n,
        }
    }

    /// The PRF domain tweak of this context.
    pub const fn tweak(self) -> u64 {
        ((self.task as u64) << 32) | self.op as u64
    }
}

/// Errors related to sending, receiving and encoding messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The node has been stopped, pending and future receives fail.
    #[error("node is stopping")]
    Stopping,
    /// Only single values and majority-of-three receives exist.
    #[error("cannot combine {0} values, expected 1 or 3")]
    UnsupportedCount(usize),
    /// There is no connection to the given party.
    #[error("no route to party {0}")]
    Unreachable(PartyId),
    /// A wire frame could not be (de-)serialized.
    #[error("invalid wire frame: {0}")]
    Codec(#[from] bincode::Error),
    /// A wire frame exceeded the maximum frame length.
    #[error("wire frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    /// The underlying connection failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The majority-of-three rule: `a` if it agrees with `b` or `c`, otherwise `b`.
///
/// Returns the correct value whenever at most one of the three inputs is wrong.
pub fn jmp(a: u64, b: u64, c: u64) -> u64 {
    if a == b || a == c { a } else { b }
}

/// Combines the values of one receive.
pub fn combine(values: &[u64]) -> Result<u64, Error> {
    match *values {
        [v] => Ok(v),
        [a, b, c] => Ok(jmp(a, b, c)),
        _ => Err(Error::UnsupportedCount(values.len())),
    }
}

fn check_count(count: usize) -> Result<(), Error> {
    match count {
        1 | 3 => Ok(()),
        _ => Err(Error::UnsupportedCount(count)),
    }
}

/// The point-to-point transport every party uses to talk to the other four.
pub trait Transport: Send + Sync {
    /// The id of the party this transport belongs to.
    fn id(&self) -> PartyId;

    /// Sends `value` to `to`, addressed with `ctx`. Does not wait for delivery.
    fn send(&self, to: PartyId, ctx: TaskContext, value: u64) -> Result<(), Error>;

    /// Waits for `count` values addressed with `ctx` and combines them with [`combine`].
    fn receive(
        &self,
        ctx: TaskContext,
        count: usize,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Drops the (empty) mailbox of a finished task.
    fn release_task(&self, task: TaskId);

    /// Stops the node: all pending and future receives fail with [`Error::Stopping`].
    fn stop(&self);
}

/// A single value on the wire, tagged with its sender and address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// The id of the sending party.
    pub sender: u8,
    /// The task the value belongs to.
    pub task: TaskId,
    /// The operation within the task.
    pub op: OpId,
    /// The transferred ring element.
    pub value: u64,
}

impl WireMessage {
    /// The address of this message.
    pub fn context(&self) -> TaskContext {
        TaskContext::new(self.task, self.op)
    }
}

/// Maximum accepted length of an encoded frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes a batch of messages as a length-prefixed frame.
pub fn encode_frame(batch: &[WireMessage]) -> Result<Vec<u8>, Error> {
    let payload = bincode::serialize(batch)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend((payload.len() as u32).to_le_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decodes the payload of a frame (without its length prefix).
pub fn decode_frame(payload: &[u8]) -> Result<Vec<WireMessage>, Error> {
    Ok(bincode::deserialize(payload)?)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct TaskQueue {
    pending: Mutex<HashMap<OpId, VecDeque<u64>>>,
    arrived: Notify,
}

impl TaskQueue {
    fn push(&self, op: OpId, value: u64) {
        lock(&self.pending).entry(op).or_default().push_back(value);
        self.arrived.notify_waiters();
    }

    fn take(&self, op: OpId, count: usize) -> Option<Vec<u64>> {
        let mut pending = lock(&self.pending);
        let queue = pending.get_mut(&op)?;
        if queue.len() < count {
            return None;
        }
        let values = queue.drain(..count).collect();
        if queue.is_empty() {
            pending.remove(&op);
        }
        Some(values)
    }

    fn len(&self) -> usize {
        lock(&self.pending).values().map(VecDeque::len).sum()
    }
}

/// Buffers values that arrived for a party until a receive asks for them.
///
/// Values are kept in FIFO order per `(task, op)`. The per-task queue is created lazily by
/// whichever comes first, the delivery or the receive.
#[derive(Debug, Default)]
pub struct Mailbox {
    tasks: Mutex<HashMap<TaskId, Arc<TaskQueue>>>,
    stopped: AtomicBool,
}

impl Mailbox {
    fn queue(&self, task: TaskId) -> Arc<TaskQueue> {
        lock(&self.tasks).entry(task).or_default().clone()
    }

    /// Enqueues a value for `ctx` and wakes the waiters of its task.
    pub fn deliver(&self, ctx: TaskContext, value: u64) {
        if self.is_stopped() {
            trace!(task = ctx.task, op = ctx.op, "dropping value for stopped mailbox");
            return;
        }
        self.queue(ctx.task).push(ctx.op, value);
    }

    /// Waits until `count` values for `ctx` are buffered and removes them.
    pub async fn take(&self, ctx: TaskContext, count: usize) -> Result<Vec<u64>, Error> {
        let queue = self.queue(ctx.task);
        loop {
            let mut arrived = pin!(queue.arrived.notified());
            arrived.as_mut().enable();
            if self.is_stopped() {
                return Err(Error::Stopping);
            }
            if let Some(values) = queue.take(ctx.op, count) {
                return Ok(values);
            }
            arrived.await;
        }
    }

    /// Drops the queue of a finished task, returning the number of values it still held.
    ///
    /// Leftover values are discarded along with the queue.
    pub fn release(&self, task: TaskId) -> usize {
        let Some(queue) = lock(&self.tasks).remove(&task) else {
            return 0;
        };
        let discarded = queue.len();
        if discarded > 0 {
            warn!(task, discarded, "released a task with undelivered values");
        }
        discarded
    }

    /// Fails all pending and future [`Self::take`] calls.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for queue in lock(&self.tasks).values() {
            queue.arrived.notify_waiters();
        }
    }

    /// Whether [`Self::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// An in-process transport connecting five parties through shared mailboxes.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    id: PartyId,
    mailboxes: Arc<[Mailbox; PARTIES]>,
}

impl LocalTransport {
    /// Creates connected transports for all five parties, in party order.
    pub fn network() -> [Arc<Self>; PARTIES] {
        let mailboxes: Arc<[Mailbox; PARTIES]> = Arc::new(Default::default());
        PartyId::ALL.map(|id| {
            Arc::new(LocalTransport {
                id,
                mailboxes: mailboxes.clone(),
            })
        })
    }

    fn own(&self) -> &Mailbox {
        &self.mailboxes[self.id.index()]
    }
}

impl Transport for LocalTransport {
    fn id(&self) -> PartyId {
        self.id
    }

    fn send(&self, to: PartyId, ctx: TaskContext, value: u64) -> Result<(), Error> {
        if self.own().is_stopped() {
            return Err(Error::Stopping);
        }
        trace!(from = %self.id, %to, task = ctx.task, op = ctx.op, "send");
        self.mailboxes[to.index()].deliver(ctx, value);
        Ok(())
    }

    async fn receive(&self, ctx: TaskContext, count: usize) -> Result<u64, Error> {
        check_count(count)?;
        let values = self.own().take(ctx, count).await?;
        combine(&values)
    }

    fn release_task(&self, task: TaskId) {
        self.own().release(task);
    }

    fn stop(&self) {
        self.own().stop();
    }
}
