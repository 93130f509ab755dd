//! Error types
//!
//! Input errors end the current streaming epoch. Client errors only take
//! down the client they belong to.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input or output session could not be established
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// The input has no video track to relay
    #[error("no video track found")]
    NoVideoTrack,

    /// The container writer did not consume a requested header option
    #[error("header option not accepted: {0}")]
    OptionRejected(String),

    /// Reading from the upstream input failed
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// Writing to a client's output failed
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The client's outbound queue overflowed
    #[error("client is too slow")]
    ClientTooSlow,

    /// The client went away
    #[error("client went away")]
    ClientGone,

    /// Malformed bitstream data
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Underlying I/O error
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Bitstream parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("invalid FLV header")]
    InvalidFlvHeader,

    #[error("invalid AVC packet")]
    InvalidAvcPacket,

    #[error("invalid sequence parameter set")]
    InvalidSps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_converts() {
        let err: Error = MediaError::InvalidSps.into();
        assert!(matches!(err, Error::Media(MediaError::InvalidSps)));
        assert_eq!(err.to_string(), "invalid sequence parameter set");
    }
}
