//! A [`Transport`] over TCP, for running the five parties as separate processes.
//!
//! Every party listens on its configured address and opens one outgoing connection per peer.
//! Outgoing values are queued to a writer task per peer, which coalesces them into frames of up
//! to `batch_size` messages. Incoming frames are decoded by one reader task per connection and
//! delivered into the party's [`Mailbox`].
use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{JoinHandle, JoinSet},
    time::{Instant, sleep, timeout, timeout_at},
};
use tracing::{debug, info, trace, warn};

use crate::{
    channel::{
        Error, MAX_FRAME_LEN, Mailbox, TaskContext, TaskId, Transport, WireMessage, combine,
        decode_frame, encode_frame,
    },
    config::Config,
    share::{PARTIES, PartyId},
};

/// How long [`TcpTransport::shutdown`] waits for queued messages to be written.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct Batching {
    size: usize,
    linger: Duration,
}

/// A party's connections to its four peers.
#[derive(Debug)]
pub struct TcpTransport {
    id: PartyId,
    mailbox: Arc<Mailbox>,
    outboxes: Mutex<[Option<UnboundedSender<WireMessage>>; PARTIES]>,
    writers: Mutex<Vec<JoinHandle<()>>>,
    acceptor: JoinHandle<()>,
}

impl TcpTransport {
    /// Binds the listener of party `id` and starts connecting to the other parties.
    ///
    /// Connections are established in the background; messages sent before a connection is up
    /// are queued.
    pub async fn start(id: PartyId, config: &Config) -> Result<Arc<Self>, Error> {
        let listener = TcpListener::bind(config.address(id)).await?;
        info!(party = %id, addr = %config.address(id), "listening");
        let mailbox = Arc::new(Mailbox::default());
        let acceptor = tokio::spawn(accept_loop(id, listener, mailbox.clone()));

        let batching = Batching {
            size: config.batch_size.max(1),
            linger: config.batch_linger(),
        };
        let mut outboxes: [Option<UnboundedSender<WireMessage>>; PARTIES] = Default::default();
        let mut writers = Vec::with_capacity(PARTIES - 1);
        for peer in id.others() {
            let (tx, rx) = mpsc::unbounded_channel();
            outboxes[peer.index()] = Some(tx);
            let addr = config.address(peer);
            let retry = config.connect_retry();
            let attempts = config.connect_attempts;
            writers.push(tokio::spawn(async move {
                let stream = match connect(addr, retry, attempts).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(party = %id, %peer, "could not connect: {e}");
                        return;
                    }
                };
                if let Err(e) = write_loop(stream, rx, batching).await {
                    warn!(party = %id, %peer, "writer failed: {e}");
                }
            }));
        }

        Ok(Arc::new(Self {
            id,
            mailbox,
            outboxes: Mutex::new(outboxes),
            writers: Mutex::new(writers),
            acceptor,
        }))
    }

    /// Flushes all queued messages, then stops the transport.
    pub async fn shutdown(&self) {
        self.outboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
            .for_each(|outbox| *outbox = None);
        let writers =
            std::mem::take(&mut *self.writers.lock().unwrap_or_else(PoisonError::into_inner));
        for writer in writers {
            if timeout(SHUTDOWN_GRACE, writer).await.is_err() {
                warn!(party = %self.id, "writer did not finish in time");
            }
        }
        self.stop();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

impl Transport for TcpTransport {
    fn id(&self) -> PartyId {
        self.id
    }

    fn send(&self, to: PartyId, ctx: TaskContext, value: u64) -> Result<(), Error> {
        if self.mailbox.is_stopped() {
            return Err(Error::Stopping);
        }
        if to == self.id {
            self.mailbox.deliver(ctx, value);
            return Ok(());
        }
        let msg = WireMessage {
            sender: self.id.get(),
            task: ctx.task,
            op: ctx.op,
            value,
        };
        let outboxes = self.outboxes.lock().unwrap_or_else(PoisonError::into_inner);
        match &outboxes[to.index()] {
            Some(outbox) => outbox.send(msg).map_err(|_| Error::Unreachable(to)),
            None => Err(Error::Unreachable(to)),
        }
    }

    async fn receive(&self, ctx: TaskContext, count: usize) -> Result<u64, Error> {
        let values = self.mailbox.take(ctx, count).await?;
        combine(&values)
    }

    fn release_task(&self, task: TaskId) {
        self.mailbox.release(task);
    }

    fn stop(&self) {
        self.mailbox.stop();
        self.acceptor.abort();
        for writer in self
            .writers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            writer.abort();
        }
    }
}

async fn connect(addr: SocketAddr, retry: Duration, attempts: u32) -> Result<TcpStream, Error> {
    let mut attempt = 1;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!(%addr, attempt, "connected");
                return Ok(stream);
            }
            Err(e) if attempt < attempts => {
                trace!(%addr, attempt, "connection failed: {e}");
                attempt += 1;
                sleep(retry).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_loop(
    mut stream: TcpStream,
    mut outbox: UnboundedReceiver<WireMessage>,
    batching: Batching,
) -> Result<(), Error> {
    let mut batch = Vec::with_capacity(batching.size);
    while let Some(msg) = outbox.recv().await {
        batch.push(msg);
        while batch.len() < batching.size {
            match outbox.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(_) => break,
            }
        }
        if batch.len() < batching.size && !batching.linger.is_zero() {
            let deadline = Instant::now() + batching.linger;
            while batch.len() < batching.size {
                match timeout_at(deadline, outbox.recv()).await {
                    Ok(Some(msg)) => batch.push(msg),
                    _ => break,
                }
            }
        }
        stream.write_all(&encode_frame(&batch)?).await?;
        batch.clear();
    }
    stream.shutdown().await?;
    Ok(())
}

async fn accept_loop(id: PartyId, listener: TcpListener, mailbox: Arc<Mailbox>) {
    let mut readers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(party = %id, %addr, "accepted connection");
                    readers.spawn(read_loop(stream, mailbox.clone()));
                }
                Err(e) => warn!(party = %id, "accept failed: {e}"),
            },
            Some(finished) = readers.join_next() => match finished {
                Ok(Err(e)) => warn!(party = %id, "reader failed: {e}"),
                Err(e) if e.is_panic() => warn!(party = %id, "reader panicked: {e}"),
                _ => {}
            },
        }
    }
}

async fn read_loop(mut stream: TcpStream, mailbox: Arc<Mailbox>) -> Result<(), Error> {
    let mut len = [0u8; 4];
    loop {
        match stream.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge(len));
        }
        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await?;
        for msg in decode_frame(&payload)? {
            if PartyId::new(msg.sender).is_err() {
                warn!(sender = msg.sender, "dropping message from unknown party");
                continue;
            }
            mailbox.deliver(msg.context(), msg.value);
        }
    }
}
