//! HTTP server
//!
//! Serves each connected client its own fragmented MP4 stream of the single
//! upstream input.

pub mod config;
pub mod listener;
pub mod routes;

pub use config::StreamerConfig;
pub use listener::StreamServer;
