//! Input and output sessions
//!
//! An [`InputSession`] wraps the single upstream demuxer. Each connected
//! client gets its own [`OutputSession`] with independent timestamp state.

pub mod input;
pub mod output;
pub mod repair;

pub use input::{InputSession, ReadOutcome};
pub use output::OutputSession;
pub use repair::TimestampRepair;
