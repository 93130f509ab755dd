//! Client registry and admission
//!
//! Clients are handed to the relay over a bounded admission channel. From
//! then on the relay owns them; callers only keep a handle.
//!
//! # Architecture
//!
//! ```text
//!     [HTTP handler]          [HTTP handler]
//!     subscribe()             subscribe()
//!          │                       │
//!          └──────► admission ◄────┘
//!                   (mpsc, 1)
//!                       │
//!                       ▼
//!                 PacketRelay ── read ── InputSession
//!                       │
//!          ┌────────────┼────────────┐
//!          ▼            ▼            ▼
//!       queue(N)     queue(N)     queue(N)
//!          │            │            │
//!     [Delivery]   [Delivery]   [Delivery] ── OutputSession ── pipe
//! ```
//!
//! # Zero-Copy Design
//!
//! Packets carry `bytes::Bytes` payloads, so every per-client queue holds a
//! reference to the same allocation.

pub mod client;
pub mod store;

pub use client::{Client, ClientHandle, ClientId, Subscription};
pub use store::{ClientRegistry, DEFAULT_PIPE_BUFFER, DEFAULT_QUEUE_CAPACITY};
