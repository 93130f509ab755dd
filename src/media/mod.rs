//! Media primitives
//!
//! This module provides:
//! - Packet, track and time base types shared by demuxers and muxers
//! - FLV container parsing
//! - H.264 decoder configuration and SPS parsing

pub mod flv;
pub mod h264;
pub mod packet;

pub use packet::{rescale, CodecId, CodecParameters, MediaKind, Packet, Timebase, Track};
