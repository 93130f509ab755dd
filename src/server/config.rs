//! Streamer configuration

use crate::error::{Error, Result};
use crate::format::mp4::MuxOptions;
use crate::registry::{DEFAULT_PIPE_BUFFER, DEFAULT_QUEUE_CAPACITY};
use crate::relay::RelayConfig;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Streamer configuration options
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Host to listen on (name or address)
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Input format name (e.g. `flv`)
    pub input_format: String,

    /// Input locator (e.g. `tcp://127.0.0.1:1935` or a file path)
    pub input_url: String,

    /// Packets buffered per client before it is cut off
    pub queue_capacity: usize,

    /// In-memory pipe buffer between a client's writer and its HTTP body
    pub pipe_buffer: usize,

    /// Header options for each client's MP4 writer
    pub mux_options: MuxOptions,

    /// Log every packet
    pub verbose: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            input_format: "flv".into(),
            input_url: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
            mux_options: MuxOptions::streaming(),
            verbose: false,
        }
    }
}

impl StreamerConfig {
    /// Create a config reading `input_url` with the named format
    pub fn new(input_format: impl Into<String>, input_url: impl Into<String>) -> Self {
        Self {
            input_format: input_format.into(),
            input_url: input_url.into(),
            ..Default::default()
        }
    }

    /// Set the listen host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the per-client queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the subscription pipe buffer (at least 1 byte)
    pub fn pipe_buffer(mut self, size: usize) -> Self {
        self.pipe_buffer = size.max(1);
        self
    }

    /// Replace the MP4 header options
    pub fn mux_options(mut self, options: MuxOptions) -> Self {
        self.mux_options = options;
        self
    }

    /// Enable per-packet logging
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Reject empty required settings
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.input_format.trim().is_empty() {
            return Err(Error::Config("input format must not be empty".into()));
        }
        if self.input_url.trim().is_empty() {
            return Err(Error::Config("input URL must not be empty".into()));
        }
        Ok(())
    }

    /// Relay settings derived from this config
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig::new(&self.input_format, &self.input_url)
            .queue_capacity(self.queue_capacity)
            .pipe_buffer(self.pipe_buffer)
            .mux_options(self.mux_options.clone())
            .verbose(self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamerConfig::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.input_format, "flv");
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.mux_options, MuxOptions::streaming());
        assert!(!config.verbose);
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(StreamerConfig::default().validate().is_err());
        assert!(StreamerConfig::new("", "file:in.flv").validate().is_err());
        assert!(StreamerConfig::new("flv", "file:in.flv")
            .host(" ")
            .validate()
            .is_err());
        assert!(StreamerConfig::new("flv", "file:in.flv").validate().is_ok());
    }

    #[test]
    fn test_builder_clamps() {
        let config = StreamerConfig::default().queue_capacity(0).pipe_buffer(0);

        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.pipe_buffer, 1);
    }

    #[test]
    fn test_relay_config() {
        let relay = StreamerConfig::new("flv", "tcp://127.0.0.1:1935")
            .queue_capacity(16)
            .pipe_buffer(4096)
            .verbose(true)
            .relay_config();

        assert_eq!(relay.input_format, "flv");
        assert_eq!(relay.input_url, "tcp://127.0.0.1:1935");
        assert_eq!(relay.output_format, "mp4");
        assert_eq!(relay.queue_capacity, 16);
        assert_eq!(relay.pipe_buffer, 4096);
        assert!(relay.verbose);
    }
}
