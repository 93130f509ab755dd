//! Per-client delivery task
//!
//! Drains one client's packet queue into its own output session. The output
//! is opened inside the task so a slow sink never holds up the relay.
//!
//! Once the client is cancelled, every pending write gets
//! `RelayConfig::close_timeout` to complete. A peer that keeps its connection
//! open without reading is then abandoned, trailer and all.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::RelayConfig;
use crate::media::{Packet, Track};
use crate::registry::client::PendingDelivery;
use crate::registry::ClientId;
use crate::session::OutputSession;

pub(crate) struct Delivery {
    pub(crate) client_id: ClientId,
    pub(crate) pending: PendingDelivery,
    pub(crate) cancel: CancellationToken,
    pub(crate) track: Track,
    pub(crate) config: Arc<RelayConfig>,
}

impl Delivery {
    pub(crate) async fn run(self) {
        let Delivery {
            client_id,
            pending,
            cancel,
            track,
            config,
        } = self;
        let PendingDelivery {
            sink,
            mut queue,
            done,
        } = pending;

        let grace = config.close_timeout;
        let open = OutputSession::open(&config.output_format, sink, &track, &config.mux_options);
        let opened = tokio::select! {
            result = open => Some(result),
            _ = cancelled_for(&cancel, grace) => None,
        };
        let mut output = match opened {
            Some(Ok(output)) => output,
            Some(Err(e)) => {
                tracing::warn!(client_id = client_id, error = %e, "Failed to open output");
                discard(&mut queue);
                drop(done);
                return;
            }
            None => {
                tracing::info!(client_id = client_id, "Header write abandoned");
                discard(&mut queue);
                drop(done);
                return;
            }
        };
        output.set_verbose(config.verbose);
        tracing::debug!(client_id = client_id, "Delivery started");

        let input_timebase = track.timebase;
        let mut written = 0u64;
        let mut torn = false;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!(client_id = client_id, "Delivery cancelled");
                    break;
                }

                packet = queue.recv() => {
                    let Some(packet) = packet else {
                        tracing::debug!(client_id = client_id, "Queue closed");
                        break;
                    };
                    let result = tokio::select! {
                        result = output.write(packet, input_timebase) => Some(result),
                        _ = cancelled_for(&cancel, grace) => None,
                    };
                    let Some(result) = result else {
                        torn = true;
                        break;
                    };
                    if let Err(e) = result {
                        tracing::info!(client_id = client_id, error = %e, "Write failed");
                        break;
                    }
                    written += 1;
                }
            }
        }

        let dropped = discard(&mut queue);
        if torn {
            // a fragment was cut short, a trailer after it would be garbage
            tracing::info!(client_id = client_id, "Write abandoned");
        } else if tokio::time::timeout(grace, output.close()).await.is_err() {
            tracing::info!(client_id = client_id, "Trailer write abandoned");
        }
        drop(output);

        tracing::debug!(
            client_id = client_id,
            written = written,
            dropped = dropped,
            "Delivery finished"
        );
        drop(done);
    }
}

/// Resolves `grace` after the client has been cancelled
async fn cancelled_for(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}

/// Close the queue and drop whatever is still in it
fn discard(queue: &mut mpsc::Receiver<Packet>) -> usize {
    queue.close();
    let mut dropped = 0;
    while queue.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
