//! fanmux: one upstream video input, many fragmented MP4 clients
//!
//! A single input (an FLV push, file or pipe) is demultiplexed once and its
//! video track is remuxed, without re-encoding, into an independent
//! fragmented MP4 stream for every connected client. The upstream connection
//! is opened when the first client arrives and closed when the last one
//! leaves.
//!
//! ```text
//! upstream ─► InputSession ─► PacketRelay ─┬─► queue ─► Delivery ─► OutputSession ─► client
//!                                          ├─► queue ─► Delivery ─► OutputSession ─► client
//!                                          └─► ...
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fanmux::{StreamServer, StreamerConfig};
//!
//! # async fn run() -> fanmux::Result<()> {
//! fanmux::format::setup();
//! let config = StreamerConfig::new("flv", "tcp://127.0.0.1:1935").port(8080);
//! StreamServer::new(config).run().await
//! # }
//! ```

pub mod error;
pub mod format;
pub mod media;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod sink;

pub use error::{Error, MediaError, Result};
pub use format::mp4::MuxOptions;
pub use media::{Packet, Timebase, Track};
pub use registry::{ClientHandle, ClientRegistry, Subscription};
pub use relay::{PacketRelay, RelayConfig, RelayStats};
pub use server::{StreamServer, StreamerConfig};
pub use sink::{open_sink, BoxedSink};
