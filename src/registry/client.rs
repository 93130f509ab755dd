//! Client records and handles
//!
//! A [`Client`] is owned by the relay. The caller keeps a [`ClientHandle`]
//! (or a [`Subscription`] wrapping one) that can cancel it and wait for its
//! delivery task to wind down.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::media::Packet;
use crate::sink::BoxedSink;

/// Unique client identifier
pub type ClientId = u64;

/// Everything a delivery task needs that is handed over on first packet
pub(crate) struct PendingDelivery {
    pub(crate) sink: BoxedSink,
    pub(crate) queue: mpsc::Receiver<Packet>,
    pub(crate) done: watch::Sender<()>,
}

/// A registered client, owned by the relay
pub struct Client {
    pub(crate) id: ClientId,
    pub(crate) queue: mpsc::Sender<Packet>,
    pub(crate) cancel: CancellationToken,
    /// Present until the delivery task has been started
    pub(crate) pending: Option<PendingDelivery>,
}

impl Client {
    pub(crate) fn new(id: ClientId, sink: BoxedSink, queue_capacity: usize) -> (Self, ClientHandle) {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (done_tx, done_rx) = watch::channel(());
        let cancel = CancellationToken::new();

        let client = Client {
            id,
            queue: queue_tx,
            cancel: cancel.clone(),
            pending: Some(PendingDelivery {
                sink,
                queue: queue_rx,
                done: done_tx,
            }),
        };
        let handle = ClientHandle {
            id,
            cancel,
            done: done_rx,
        };
        (client, handle)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Whether the delivery task has been started
    pub fn is_started(&self) -> bool {
        self.pending.is_none()
    }

    /// Whether the client can no longer take packets
    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled() || self.queue.is_closed()
    }
}

/// Caller-side view of a client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    cancel: CancellationToken,
    done: watch::Receiver<()>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Ask the client to stop without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the client has been released by the relay and its
    /// delivery task, if any, has closed its output
    pub async fn finished(&self) {
        let mut done = self.done.clone();
        while done.changed().await.is_ok() {}
    }

    /// Cancel the client and wait until it is fully released.
    ///
    /// A write already in progress runs to completion first. Calling this
    /// again, or after the client ended on its own, returns immediately.
    pub async fn unregister(&self) {
        self.cancel();
        self.finished().await;
        tracing::debug!(client_id = self.id, "Client unregistered");
    }
}

/// Readable container stream of one client.
///
/// Dropping it cancels the client.
#[derive(Debug)]
pub struct Subscription {
    handle: ClientHandle,
    reader: DuplexStream,
}

impl Subscription {
    pub(crate) fn new(handle: ClientHandle, reader: DuplexStream) -> Self {
        Self { handle, reader }
    }

    pub fn id(&self) -> ClientId {
        self.handle.id
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Close the read side and wait until the client is released
    pub async fn unregister(self) {
        let handle = self.handle.clone();
        // closing the pipe first unblocks a write stuck on a full buffer
        drop(self);
        handle.unregister().await;
    }
}

impl AsyncRead for Subscription {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
