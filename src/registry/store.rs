//! Client registry
//!
//! Admits clients into the relay over a bounded channel of capacity one, so
//! a registration only completes once the relay has room to take it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::client::{Client, ClientHandle, Subscription};
use crate::error::{Error, Result};
use crate::sink::BoxedSink;

/// Default per-client packet queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default in-memory pipe buffer for subscriptions
pub const DEFAULT_PIPE_BUFFER: usize = 256 * 1024;

/// Entry point for adding and removing clients.
///
/// Cheap to clone. The relay keeps running for as long as any clone is alive.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    admission: mpsc::Sender<Client>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
    pipe_buffer: usize,
}

impl ClientRegistry {
    pub(crate) fn new(
        admission: mpsc::Sender<Client>,
        queue_capacity: usize,
        pipe_buffer: usize,
    ) -> Self {
        Self {
            admission,
            next_id: Arc::new(AtomicU64::new(1)),
            queue_capacity,
            pipe_buffer,
        }
    }

    /// Register a client writing into `sink`.
    ///
    /// Waits until the relay accepts the client.
    pub async fn register(&self, sink: BoxedSink) -> Result<ClientHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (client, handle) = Client::new(id, sink, self.queue_capacity);

        self.admission
            .send(client)
            .await
            .map_err(|_| Error::ClientGone)?;

        tracing::debug!(client_id = id, "Client registered");
        Ok(handle)
    }

    /// Register a client behind an in-memory pipe and return the read side
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (writer, reader) = tokio::io::duplex(self.pipe_buffer);
        let handle = self.register(Box::new(writer)).await?;
        Ok(Subscription::new(handle, reader))
    }

    /// Cancel a client and wait until it is released
    pub async fn unregister(&self, handle: &ClientHandle) {
        handle.unregister().await;
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Whether the relay has stopped accepting clients
    pub fn is_closed(&self) -> bool {
        self.admission.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_hands_client_to_relay() {
        let (tx, mut rx) = mpsc::channel(1);
        let registry = ClientRegistry::new(tx, 8, 1024);

        let handle = registry.register(Box::new(tokio::io::sink())).await.unwrap();
        let client = rx.recv().await.unwrap();
        assert_eq!(client.id(), handle.id());

        let second = registry.register(Box::new(tokio::io::sink())).await.unwrap();
        assert_ne!(second.id(), handle.id());
    }

    #[tokio::test]
    async fn test_register_after_relay_stopped() {
        let (tx, rx) = mpsc::channel(1);
        let registry = ClientRegistry::new(tx, 8, 1024);
        drop(rx);

        assert!(registry.is_closed());
        assert!(matches!(
            registry.subscribe().await,
            Err(Error::ClientGone)
        ));
    }

    #[tokio::test]
    async fn test_admission_blocks_while_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let registry = ClientRegistry::new(tx, 8, 1024);

        let _first = registry.register(Box::new(tokio::io::sink())).await.unwrap();
        let blocked = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.register(Box::new(tokio::io::sink())).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        rx.recv().await.unwrap();
        assert!(blocked.await.unwrap().is_ok());
    }
}
