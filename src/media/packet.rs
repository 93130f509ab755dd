//! Tracks, packets and time bases
//!
//! A [`Packet`] is one compressed access unit. Its payload is a `Bytes`
//! handle, so cloning a packet for every connected client only copies the
//! small timestamp header while the payload memory stays shared.

use std::fmt;

use bytes::Bytes;

/// Rational time base (seconds per tick = num / den)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timebase {
    pub num: u32,
    pub den: u32,
}

impl Timebase {
    /// Millisecond time base used by FLV
    pub const MILLIS: Timebase = Timebase::new(1, 1000);

    /// 90kHz time base common to RTP video
    pub const MPEG: Timebase = Timebase::new(1, 90_000);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a timestamp in this time base to seconds
    pub fn seconds(&self, ts: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ts as f64 * self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescale `value` from one time base to another.
///
/// Rounds to nearest with ties away from zero. The arithmetic is done in 128
/// bits and clamped to the i64 range; `i64::MIN` and `i64::MAX` pass through
/// untouched.
pub fn rescale(value: i64, from: Timebase, to: Timebase) -> i64 {
    if value == i64::MIN || value == i64::MAX {
        return value;
    }

    let b = from.num as i128 * to.den as i128;
    let c = to.num as i128 * from.den as i128;
    if c == 0 {
        return value;
    }

    let n = value as i128 * b;
    let half = c / 2;
    let rounded = if n >= 0 {
        (n + half) / c
    } else {
        -((-n + half) / c)
    };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

/// Codec identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    H264,
    Hevc,
    /// Codec the crate cannot carry; holds the container-specific id
    Other(u8),
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecId::H264 => write!(f, "h264"),
            CodecId::Hevc => write!(f, "hevc"),
            CodecId::Other(id) => write!(f, "codec#{}", id),
        }
    }
}

/// Codec parameters discovered by the demuxer.
///
/// `extradata` is the decoder configuration record exactly as the input
/// carried it. Muxers copy it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    pub codec: CodecId,
    pub extradata: Bytes,
    pub width: u32,
    pub height: u32,
}

impl CodecParameters {
    pub fn new(codec: CodecId, extradata: Bytes) -> Self {
        Self {
            codec,
            extradata,
            width: 0,
            height: 0,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// One elementary stream of an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub index: usize,
    pub kind: MediaKind,
    pub timebase: Timebase,
    pub codec: CodecParameters,
}

impl Track {
    pub fn video(index: usize, timebase: Timebase, codec: CodecParameters) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            timebase,
            codec,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// One compressed access unit
#[derive(Debug, Clone)]
pub struct Packet {
    /// Payload, shared between every clone
    pub data: Bytes,
    /// Presentation timestamp, `None` when unset
    pub pts: Option<i64>,
    /// Decode timestamp, `None` when unset
    pub dts: Option<i64>,
    /// Duration in the owning track's time base (0 if unknown)
    pub duration: i64,
    /// Index of the track this packet belongs to
    pub track_index: usize,
    /// Byte position in the input, if known
    pub position: Option<u64>,
    /// Whether the packet starts a decodable picture sequence
    pub keyframe: bool,
}

impl Packet {
    pub fn new(track_index: usize, data: Bytes) -> Self {
        Self {
            data,
            pts: None,
            dts: None,
            duration: 0,
            track_index,
            position: None,
            keyframe: false,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
