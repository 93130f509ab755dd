//! FLV demuxer
//!
//! Reads an FLV byte stream (a file, a TCP push or stdin) and turns its tags
//! into packets. Opening probes the stream until the video decoder
//! configuration shows up so the video track can be described; every tag read
//! while probing is replayed afterwards in order.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{open_source, Demuxer, InputFormat};
use crate::error::{Error, MediaError, Result};
use crate::media::flv::{
    FlvHeader, FlvTag, FlvTagType, TagHeader, VideoCodec, VideoFrameType, FLV_HEADER_SIZE,
    PREVIOUS_TAG_SIZE, TAG_HEADER_SIZE,
};
use crate::media::h264::{read_si24, AvcVideoPacket};
use crate::media::{CodecId, CodecParameters, MediaKind, Packet, Timebase, Track};

/// Name the format is registered under
pub const FORMAT_NAME: &str = "flv";

/// Tags read while looking for the video configuration
pub const DEFAULT_PROBE_TAGS: usize = 512;

/// Input format factory for FLV streams
#[derive(Debug, Clone)]
pub struct FlvFormat {
    probe_tags: usize,
}

impl Default for FlvFormat {
    fn default() -> Self {
        Self {
            probe_tags: DEFAULT_PROBE_TAGS,
        }
    }
}

impl FlvFormat {
    /// Limit how many tags are read while probing
    pub fn with_probe_tags(mut self, tags: usize) -> Self {
        self.probe_tags = tags.max(1);
        self
    }
}

#[async_trait]
impl InputFormat for FlvFormat {
    async fn open(&self, url: &str) -> Result<Box<dyn Demuxer>> {
        let source = open_source(url).await?;
        let demuxer = FlvDemuxer::open_with_probe_limit(source, self.probe_tags)
            .await
            .map_err(|e| match e {
                Error::OpenFailed(_) => e,
                other => Error::OpenFailed(format!("{}: {}", url, other)),
            })?;
        Ok(Box::new(demuxer))
    }
}

/// Demuxer over any async byte source
pub struct FlvDemuxer<R> {
    reader: R,
    header: FlvHeader,
    /// Offset of the next unread byte
    position: u64,
    tracks: Vec<Track>,
    video_track: Option<usize>,
    audio_track: Option<usize>,
    /// Packets produced while probing
    queued: VecDeque<Packet>,
    eof: bool,
    closed: bool,
}

impl<R: AsyncRead + Unpin + Send> FlvDemuxer<R> {
    pub async fn open(reader: R) -> Result<Self> {
        Self::open_with_probe_limit(reader, DEFAULT_PROBE_TAGS).await
    }

    pub async fn open_with_probe_limit(mut reader: R, probe_tags: usize) -> Result<Self> {
        let mut buf = [0u8; FLV_HEADER_SIZE];
        reader.read_exact(&mut buf).await.map_err(read_failed)?;
        let header = FlvHeader::parse(&buf)?;

        // Skip any header extension plus the first previous-tag-size. The
        // offset comes from the stream, so it is drained rather than buffered.
        let data_start = header.data_offset as u64 + PREVIOUS_TAG_SIZE as u64;
        let skip = data_start - FLV_HEADER_SIZE as u64;
        let skipped = tokio::io::copy(&mut (&mut reader).take(skip), &mut tokio::io::sink())
            .await
            .map_err(read_failed)?;
        if skipped < skip {
            return Err(Error::ReadFailed(format!(
                "stream ended inside the {} byte header",
                data_start
            )));
        }

        let mut demuxer = FlvDemuxer {
            reader,
            header,
            position: data_start,
            tracks: Vec::new(),
            video_track: None,
            audio_track: None,
            queued: VecDeque::new(),
            eof: false,
            closed: false,
        };
        demuxer.probe(probe_tags).await?;
        Ok(demuxer)
    }

    async fn probe(&mut self, probe_tags: usize) -> Result<()> {
        for _ in 0..probe_tags {
            if self.video_track.is_some() {
                break;
            }
            let Some(tag) = self.read_tag().await? else {
                self.eof = true;
                break;
            };
            if let Some(packet) = self.packet_from_tag(tag)? {
                self.queued.push_back(packet);
            }
        }

        tracing::debug!(
            has_audio = self.header.has_audio,
            has_video = self.header.has_video,
            tracks = self.tracks.len(),
            queued = self.queued.len(),
            "FLV probe finished"
        );
        Ok(())
    }

    pub fn header(&self) -> &FlvHeader {
        &self.header
    }

    /// Read the next tag with a known type. `None` at end of stream.
    async fn read_tag(&mut self) -> Result<Option<FlvTag>> {
        loop {
            let mut buf = [0u8; TAG_HEADER_SIZE];
            match self.reader.read_exact(&mut buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(read_failed(e)),
            }
            let header = TagHeader::parse(&buf);

            let position = self.position;
            let mut data = vec![0u8; header.data_size as usize + PREVIOUS_TAG_SIZE];
            self.reader
                .read_exact(&mut data)
                .await
                .map_err(|_| Error::ReadFailed("truncated FLV tag".into()))?;
            self.position += (TAG_HEADER_SIZE + data.len()) as u64;
            data.truncate(header.data_size as usize);

            let Some(tag_type) = header.tag_type else {
                tracing::trace!(position = position, "Skipping unknown FLV tag");
                continue;
            };
            if data.is_empty() {
                continue;
            }

            return Ok(Some(FlvTag {
                tag_type,
                timestamp: header.timestamp,
                data: Bytes::from(data),
                position,
            }));
        }
    }

    fn packet_from_tag(&mut self, tag: FlvTag) -> Result<Option<Packet>> {
        match tag.tag_type {
            FlvTagType::Script => Ok(None),
            FlvTagType::Audio => {
                let index = self.audio_track_index(tag.data[0] >> 4);
                let ts = tag.timestamp as i64;
                Ok(Some(
                    Packet::new(index, tag.data.slice(1..))
                        .with_timestamps(Some(ts), Some(ts))
                        .with_keyframe(true)
                        .with_position(tag.position),
                ))
            }
            FlvTagType::Video => self.video_packet(tag),
        }
    }

    fn video_packet(&mut self, tag: FlvTag) -> Result<Option<Packet>> {
        let first = tag.data[0];
        if VideoFrameType::from_byte(first) == Some(VideoFrameType::VideoInfoFrame) {
            return Ok(None);
        }
        let keyframe = tag.is_keyframe();
        let dts = tag.timestamp as i64;

        let (composition_time, payload) = match VideoCodec::from_byte(first) {
            VideoCodec::Avc => match AvcVideoPacket::parse(tag.data.slice(1..))? {
                AvcVideoPacket::SequenceHeader(config) => {
                    let (width, height) = config.dimensions().unwrap_or_else(|e| {
                        tracing::debug!(error = %e, "Could not read picture size from SPS");
                        (0, 0)
                    });
                    self.on_video_config(
                        CodecParameters::new(CodecId::H264, config.raw)
                            .with_dimensions(width, height),
                    );
                    return Ok(None);
                }
                AvcVideoPacket::Frame {
                    composition_time,
                    nalus,
                } => (composition_time, nalus),
                AvcVideoPacket::EndOfSequence => return Ok(None),
            },
            VideoCodec::Hevc => {
                let mut data = tag.data.slice(1..);
                if data.len() < 4 {
                    return Err(MediaError::InvalidAvcPacket.into());
                }
                let packet_type = data.get_u8();
                let composition_time = read_si24(&mut data);
                match packet_type {
                    0 => {
                        self.on_video_config(CodecParameters::new(CodecId::Hevc, data));
                        return Ok(None);
                    }
                    1 => (composition_time, data),
                    2 => return Ok(None),
                    _ => return Err(MediaError::InvalidAvcPacket.into()),
                }
            }
            _ => {
                // No decoder configuration exists for these codecs
                if self.video_track.is_none() {
                    self.on_video_config(CodecParameters::new(
                        CodecId::Other(first & 0x0F),
                        Bytes::new(),
                    ));
                }
                (0, tag.data.slice(1..))
            }
        };

        let Some(index) = self.video_track else {
            tracing::debug!(dts = dts, "Dropping video frame before decoder configuration");
            return Ok(None);
        };

        Ok(Some(
            Packet::new(index, payload)
                .with_timestamps(Some(dts + composition_time as i64), Some(dts))
                .with_keyframe(keyframe)
                .with_position(tag.position),
        ))
    }

    fn on_video_config(&mut self, codec: CodecParameters) {
        if self.video_track.is_some() {
            tracing::debug!("Ignoring decoder configuration change mid-stream");
            return;
        }
        let index = self.tracks.len();
        tracing::debug!(
            index = index,
            codec = %codec.codec,
            width = codec.width,
            height = codec.height,
            "Video track found"
        );
        self.tracks.push(Track::video(index, Timebase::MILLIS, codec));
        self.video_track = Some(index);
    }

    fn audio_track_index(&mut self, sound_format: u8) -> usize {
        if let Some(index) = self.audio_track {
            return index;
        }
        let index = self.tracks.len();
        self.tracks.push(Track {
            index,
            kind: MediaKind::Audio,
            timebase: Timebase::MILLIS,
            codec: CodecParameters::new(CodecId::Other(sound_format), Bytes::new()),
        });
        self.audio_track = Some(index);
        index
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Demuxer for FlvDemuxer<R> {
    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        if self.closed {
            return Err(Error::ReadFailed("demuxer closed".into()));
        }
        loop {
            if let Some(packet) = self.queued.pop_front() {
                return Ok(packet);
            }
            if self.eof {
                return Err(Error::ReadFailed("end of stream".into()));
            }
            let Some(tag) = self.read_tag().await? else {
                self.eof = true;
                continue;
            };
            let packet = self.packet_from_tag(tag).map_err(|e| match e {
                Error::Media(e) => Error::ReadFailed(e.to_string()),
                other => other,
            })?;
            if let Some(packet) = packet {
                return Ok(packet);
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.queued.clear();
        tracing::debug!(position = self.position, "FLV demuxer closed");
    }
}

fn read_failed(e: std::io::Error) -> Error {
    Error::ReadFailed(e.to_string())
}
