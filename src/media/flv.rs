//! FLV container primitives
//!
//! An FLV byte stream is a 9-byte file header followed by tags, each one
//! preceded by the 4-byte size of the previous tag:
//!
//! ```text
//! +-----------+-----+---------+------------+-----+---------+------------+
//! | Header(9) | P0  | TagHdr  | TagData    | P1  | TagHdr  | TagData    | ...
//! +-----------+-----+---------+------------+-----+---------+------------+
//!
//! TagHdr (11 bytes):
//! +--------+-------------+-----------+-----------+-------------+
//! | Type(1)| DataSize(3) | TS(3)     | TSExt(1)  | StreamID(3) |
//! +--------+-------------+-----------+-----------+-------------+
//! ```
//!
//! Video tag data starts with one byte holding the frame type (upper nibble)
//! and codec id (lower nibble).

use bytes::Bytes;

use crate::error::{MediaError, Result};

/// Size of the FLV file header
pub const FLV_HEADER_SIZE: usize = 9;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

/// Size of the back-pointer that follows every tag
pub const PREVIOUS_TAG_SIZE: usize = 4;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        // Upper bits carry the (unsupported) encryption filter flag
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }
}

/// FLV file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
    /// Offset of the first previous-tag-size field
    pub data_offset: u32,
}

impl FlvHeader {
    pub fn parse(buf: &[u8; FLV_HEADER_SIZE]) -> Result<Self> {
        if &buf[0..3] != b"FLV" {
            return Err(MediaError::InvalidFlvHeader.into());
        }

        let data_offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        if (data_offset as usize) < FLV_HEADER_SIZE {
            return Err(MediaError::InvalidFlvHeader.into());
        }

        Ok(FlvHeader {
            version: buf[3],
            has_audio: buf[4] & 0x04 != 0,
            has_video: buf[4] & 0x01 != 0,
            data_offset,
        })
    }
}

/// Parsed tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    /// `None` for tag types FLV does not define
    pub tag_type: Option<FlvTagType>,
    pub data_size: u32,
    /// Milliseconds, including the extended upper byte
    pub timestamp: u32,
}

impl TagHeader {
    pub fn parse(buf: &[u8; TAG_HEADER_SIZE]) -> Self {
        let data_size = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[7], buf[4], buf[5], buf[6]]);

        TagHeader {
            tag_type: FlvTagType::from_byte(buf[0]),
            data_size,
            timestamp,
        }
    }
}

/// A complete tag
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body including the codec header byte(s)
    pub data: Bytes,
    /// Byte offset of the tag header in the input
    pub position: u64,
}

/// Video frame type (upper 4 bits of the first video byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    Keyframe,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyframe,
    VideoInfoFrame,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe
        )
    }
}

/// Video codec id (lower 4 bits of the first video byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    SorensonH263,
    ScreenVideo,
    Vp6,
    Vp6Alpha,
    ScreenVideoV2,
    Avc,
    /// HEVC using the common id-12 FLV extension
    Hevc,
    Other(u8),
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x0F {
            2 => VideoCodec::SorensonH263,
            3 => VideoCodec::ScreenVideo,
            4 => VideoCodec::Vp6,
            5 => VideoCodec::Vp6Alpha,
            6 => VideoCodec::ScreenVideoV2,
            7 => VideoCodec::Avc,
            12 => VideoCodec::Hevc,
            other => VideoCodec::Other(other),
        }
    }
}

impl FlvTag {
    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        if self.is_video() && !self.data.is_empty() {
            VideoFrameType::from_byte(self.data[0])
        } else {
            None
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }
}
