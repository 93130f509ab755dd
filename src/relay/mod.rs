//! Packet relay
//!
//! The relay task owns the single input session and the set of active
//! clients. It sits idle until a client is admitted, opens the input, and
//! fans every video packet out to each client's queue until the last client
//! leaves or the input fails; then it closes the input and waits again.
//!
//! ```text
//!          admit                      last client gone / read error
//!   Idle ─────────► Streaming ──────────────────────────────────► Idle
//!                   │  prune → read → admit → fan out → release │
//!                   └───────────────────────────────────────────┘
//! ```

mod delivery;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::format::mp4::{self, MuxOptions};
use crate::media::{Packet, Track};
use crate::registry::{
    Client, ClientRegistry, ClientId, DEFAULT_PIPE_BUFFER, DEFAULT_QUEUE_CAPACITY,
};
use crate::session::{InputSession, ReadOutcome};

use delivery::Delivery;

/// How long a cancelled client's output may keep writing before it is
/// abandoned
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
pub use stats::{RelayStats, RelayStatsSnapshot};

/// What the relay reads and how it writes
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Registered input format name
    pub input_format: String,
    /// Locator handed to the input format
    pub input_url: String,
    /// Container written to each client
    pub output_format: String,
    /// Header options for every output session
    pub mux_options: MuxOptions,
    /// Packets buffered per client before it is cut off
    pub queue_capacity: usize,
    /// Buffer of each subscription's in-memory pipe
    pub pipe_buffer: usize,
    /// Grace period for a cancelled or finishing client's pending writes
    pub close_timeout: Duration,
    /// Trace every packet written
    pub verbose: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input_format: "flv".into(),
            input_url: String::new(),
            output_format: mp4::FORMAT_NAME.into(),
            mux_options: MuxOptions::streaming(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            verbose: false,
        }
    }
}

impl RelayConfig {
    pub fn new(input_format: impl Into<String>, input_url: impl Into<String>) -> Self {
        Self {
            input_format: input_format.into(),
            input_url: input_url.into(),
            ..Default::default()
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn pipe_buffer(mut self, size: usize) -> Self {
        self.pipe_buffer = size.max(1);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn mux_options(mut self, options: MuxOptions) -> Self {
        self.mux_options = options;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Whether the streaming loop should go back to idle or stop the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Idle,
    Shutdown,
}

/// The single-owner fan-out loop
pub struct PacketRelay {
    config: Arc<RelayConfig>,
    admissions: mpsc::Receiver<Client>,
    clients: Vec<Client>,
    input: Option<InputSession>,
    stats: Arc<RelayStats>,
}

impl PacketRelay {
    /// Create a relay and the registry that feeds it
    pub fn new(config: RelayConfig) -> (Self, ClientRegistry) {
        let (tx, rx) = mpsc::channel(1);
        let registry = ClientRegistry::new(tx, config.queue_capacity, config.pipe_buffer);
        let relay = Self {
            config: Arc::new(config),
            admissions: rx,
            clients: Vec::new(),
            input: None,
            stats: Arc::new(RelayStats::new()),
        };
        (relay, registry)
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the relay on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every registry handle has been dropped
    pub async fn run(mut self) {
        tracing::info!(
            format = %self.config.input_format,
            input = %self.config.input_url,
            "Relay started"
        );

        while let Some(client) = self.admissions.recv().await {
            self.admit(client);
            if self.stream().await == Next::Shutdown {
                break;
            }
        }

        self.close_input().await;
        self.release_all("relay stopped");
        tracing::info!("Relay stopped");
    }

    /// One streaming epoch: open the input and relay until nobody is left
    async fn stream(&mut self) -> Next {
        self.prune();
        if self.clients.is_empty() {
            return Next::Idle;
        }

        let input = match InputSession::open(&self.config.input_format, &self.config.input_url)
            .await
        {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open input");
                self.release_all("input unavailable");
                return Next::Idle;
            }
        };
        self.stats.input_opened();
        let track = input.track().clone();
        self.input = Some(input);

        let next = loop {
            self.prune();
            if self.clients.is_empty() {
                break Next::Idle;
            }

            let Some(input) = self.input.as_mut() else {
                break Next::Idle;
            };
            let outcome = input.read_next().await;

            if self.drain_admissions() == Next::Shutdown {
                break Next::Shutdown;
            }

            match outcome {
                Ok(ReadOutcome::Skipped) => {
                    self.stats.packet_skipped();
                }
                Ok(ReadOutcome::Video(packet)) => {
                    self.stats.packet_read(packet.size());
                    self.fan_out(packet, &track);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Input read failed");
                    self.close_input().await;
                    self.release_all("input failed");
                    break Next::Idle;
                }
            }
        };

        self.close_input().await;
        next
    }

    fn admit(&mut self, client: Client) {
        self.stats.client_admitted();
        tracing::info!(
            client_id = client.id,
            clients = self.clients.len() + 1,
            "New client"
        );
        self.clients.push(client);
        self.stats.set_active_clients(self.clients.len());
    }

    /// Move every waiting admission into the active set without blocking
    fn drain_admissions(&mut self) -> Next {
        loop {
            match self.admissions.try_recv() {
                Ok(client) => self.admit(client),
                Err(TryRecvError::Empty) => return Next::Idle,
                Err(TryRecvError::Disconnected) => return Next::Shutdown,
            }
        }
    }

    /// Hand a copy of `packet` to every client, cutting off the ones that
    /// cannot take it
    fn fan_out(&mut self, packet: Packet, track: &Track) {
        let mut cut: Vec<(ClientId, Error)> = Vec::new();

        for client in &mut self.clients {
            if let Some(pending) = client.pending.take() {
                let delivery = Delivery {
                    client_id: client.id,
                    pending,
                    cancel: client.cancel.clone(),
                    track: track.clone(),
                    config: Arc::clone(&self.config),
                };
                tokio::spawn(delivery.run());
            }

            match client.queue.try_send(packet.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => cut.push((client.id, Error::ClientTooSlow)),
                Err(TrySendError::Closed(_)) => cut.push((client.id, Error::ClientGone)),
            }
        }

        for (id, reason) in cut {
            if let Some(pos) = self.clients.iter().position(|c| c.id == id) {
                let client = self.clients.remove(pos);
                self.stats.client_cut();
                tracing::info!(client_id = id, reason = %reason, "Client cut off");
                self.terminate(client);
            }
        }
        self.stats.set_active_clients(self.clients.len());
    }

    /// Drop clients that were cancelled or whose delivery has ended
    fn prune(&mut self) {
        let mut i = 0;
        while i < self.clients.len() {
            if self.clients[i].is_finished() {
                let client = self.clients.remove(i);
                tracing::info!(
                    client_id = client.id,
                    clients = self.clients.len(),
                    "Lost client"
                );
                self.terminate(client);
            } else {
                i += 1;
            }
        }
        self.stats.set_active_clients(self.clients.len());
    }

    fn release_all(&mut self, reason: &str) {
        for client in std::mem::take(&mut self.clients) {
            tracing::info!(client_id = client.id, reason = reason, "Releasing client");
            self.terminate(client);
        }
        self.stats.set_active_clients(0);
    }

    /// Cancel a client and drop the relay's side of it
    fn terminate(&self, client: Client) {
        client.cancel.cancel();
        self.stats.client_removed();
        drop(client);
    }

    async fn close_input(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close().await;
            self.stats.input_closed();
        }
    }
}
