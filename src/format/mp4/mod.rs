//! Fragmented MP4 writer
//!
//! Writes a single video track as `ftyp` + `moov` followed by `moof`/`mdat`
//! fragments, closing with an `mfra` index. Samples are buffered until the
//! next fragment boundary because a sample's duration is only known once the
//! following decode timestamp arrives.
//!
//! The `mfra` index only keeps the most recent keyframe fragments, so a
//! client that stays connected for days does not grow it without bound.

mod boxes;
mod options;

pub use boxes::{RandomAccessPoint, SampleInfo};
pub use options::MuxOptions;

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::media::{CodecParameters, Packet, Timebase, Track};

/// Name the output format is registered under
pub const FORMAT_NAME: &str = "mp4";

/// Smallest media timescale picked automatically
const MIN_AUTO_TIMESCALE: u32 = 10_000;

/// Keyframe fragments remembered for the `mfra` index
const MAX_RANDOM_ACCESS_POINTS: usize = 4096;

/// Fragmentation behaviour selected through `movflags`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentFlags {
    /// Start a new fragment at every keyframe
    pub frag_keyframe: bool,
    /// Start a new fragment at every packet
    pub frag_every_frame: bool,
    /// Write `moov` with the header instead of with the first fragment
    pub empty_moov: bool,
    /// Mark fragments as addressed relative to their `moof`
    pub default_base_moof: bool,
}

impl FragmentFlags {
    /// Parse a `+`-separated flag list; a leading `-` clears a flag
    pub fn parse(value: &str) -> Result<Self> {
        let mut flags = FragmentFlags::default();
        for token in value.split('+').filter(|t| !t.is_empty()) {
            let (enable, name) = match token.strip_prefix('-') {
                Some(name) => (false, name),
                None => (true, token),
            };
            let flag = match name {
                "frag_keyframe" => &mut flags.frag_keyframe,
                "frag_every_frame" => &mut flags.frag_every_frame,
                "empty_moov" => &mut flags.empty_moov,
                "default_base_moof" => &mut flags.default_base_moof,
                other => {
                    return Err(Error::OpenFailed(format!("unknown movflags entry '{}'", other)))
                }
            };
            *flag = enable;
        }
        Ok(flags)
    }

    fn is_fragmented(&self) -> bool {
        self.frag_keyframe || self.frag_every_frame
    }
}

/// Pick the media timescale for a track time base.
///
/// The denominator is doubled until it reaches a usable resolution, so a
/// millisecond input ends up at 16000 ticks per second.
pub fn auto_timescale(timebase: Timebase) -> u32 {
    let mut timescale = timebase.den.max(1);
    while timescale < MIN_AUTO_TIMESCALE {
        timescale *= 2;
    }
    timescale
}

#[derive(Debug)]
struct PendingSample {
    dts: i64,
    pts: i64,
    duration: i64,
    keyframe: bool,
    data: Bytes,
}

/// Fragmented MP4 muxer over an async byte sink
pub struct Mp4Muxer<W> {
    sink: W,
    flags: FragmentFlags,
    flush_packets: bool,
    codec: CodecParameters,
    timescale: u32,
    header_written: bool,
    moov_written: bool,
    trailer_written: bool,
    pending: Vec<PendingSample>,
    sequence: u32,
    last_dts: Option<i64>,
    dts_shift: Option<i64>,
    bytes_written: u64,
    random_access: VecDeque<RandomAccessPoint>,
}

impl<W: AsyncWrite + Unpin + Send> Mp4Muxer<W> {
    /// Create a muxer for `track`.
    ///
    /// Every option the muxer understands is removed from `options`; keys
    /// left behind were not applied.
    pub fn new(sink: W, track: &Track, options: &mut MuxOptions) -> Result<Self> {
        if boxes::sample_entry_names(track.codec.codec).is_none() {
            return Err(Error::OpenFailed(format!(
                "codec {} cannot be stored in mp4",
                track.codec.codec
            )));
        }

        let flags = match options.take("movflags") {
            Some(value) => FragmentFlags::parse(&value)?,
            None => FragmentFlags::default(),
        };
        if !flags.is_fragmented() {
            return Err(Error::OpenFailed(
                "unfragmented mp4 needs a seekable output".into(),
            ));
        }

        let flush_packets = match options.take("flush_packets") {
            Some(value) => parse_int(&value, "flush_packets")? != 0,
            None => false,
        };

        let timescale = match options.take("video_track_timescale") {
            Some(value) => {
                let ts = parse_int(&value, "video_track_timescale")?;
                u32::try_from(ts)
                    .ok()
                    .filter(|ts| *ts > 0)
                    .ok_or_else(|| Error::OpenFailed(format!("invalid timescale {}", ts)))?
            }
            None => auto_timescale(track.timebase),
        };

        Ok(Self {
            sink,
            flags,
            flush_packets,
            codec: track.codec.clone(),
            timescale,
            header_written: false,
            moov_written: false,
            trailer_written: false,
            pending: Vec::new(),
            sequence: 1,
            last_dts: None,
            dts_shift: None,
            bytes_written: 0,
            random_access: VecDeque::new(),
        })
    }

    /// Time base packets must be expressed in
    pub fn timebase(&self) -> Timebase {
        Timebase::new(1, self.timescale)
    }

    pub fn flags(&self) -> FragmentFlags {
        self.flags
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write `ftyp`, plus `moov` when `empty_moov` is set
    pub async fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }

        let mut buf = BytesMut::with_capacity(1024);
        boxes::write_ftyp(&mut buf);
        if self.flags.empty_moov {
            boxes::write_moov(&mut buf, &self.codec, self.timescale);
            self.moov_written = true;
        }
        self.header_written = true;

        self.emit(&buf).await?;
        self.sink.flush().await.map_err(write_failed)
    }

    /// Queue one packet in output time base units
    pub async fn write_packet(&mut self, packet: Packet) -> Result<()> {
        if !self.header_written || self.trailer_written {
            return Err(Error::WriteFailed("muxer is not accepting packets".into()));
        }
        if packet.track_index != 0 {
            return Err(Error::WriteFailed(format!(
                "invalid track index {}",
                packet.track_index
            )));
        }

        let dts = packet
            .dts
            .ok_or_else(|| Error::WriteFailed("packet has no dts".into()))?;
        let pts = packet.pts.unwrap_or(dts);

        if let Some(last) = self.last_dts {
            if dts <= last {
                return Err(Error::WriteFailed(format!(
                    "non monotonically increasing dts: {} >= {}",
                    last, dts
                )));
            }
        }
        if pts < dts {
            return Err(Error::WriteFailed(format!("pts {} < dts {}", pts, dts)));
        }

        let shift = *self
            .dts_shift
            .get_or_insert(if dts < 0 { dts.saturating_neg() } else { 0 });
        let starts_fragment =
            self.flags.frag_every_frame || (self.flags.frag_keyframe && packet.keyframe);
        if starts_fragment && !self.pending.is_empty() {
            self.flush_fragment(Some(dts.saturating_add(shift))).await?;
        }

        self.pending.push(PendingSample {
            dts: dts.saturating_add(shift),
            pts: pts.saturating_add(shift),
            duration: packet.duration,
            keyframe: packet.keyframe,
            data: packet.data,
        });
        self.last_dts = Some(dts);
        Ok(())
    }

    /// Flush the last fragment and write the `mfra` index.
    ///
    /// Only the first call does anything, even if it fails.
    pub async fn write_trailer(&mut self) -> Result<()> {
        if self.trailer_written {
            return Ok(());
        }
        self.trailer_written = true;

        if !self.pending.is_empty() {
            self.flush_fragment(None).await?;
        }
        if !self.moov_written {
            let mut buf = BytesMut::new();
            boxes::write_moov(&mut buf, &self.codec, self.timescale);
            self.moov_written = true;
            self.emit(&buf).await?;
        }

        let mut buf = BytesMut::new();
        boxes::write_mfra(&mut buf, self.random_access.make_contiguous());
        self.emit(&buf).await?;
        self.sink.flush().await.map_err(write_failed)
    }

    /// Shut down the underlying sink
    pub async fn shutdown(&mut self) -> Result<()> {
        self.sink.shutdown().await.map_err(write_failed)
    }

    async fn flush_fragment(&mut self, next_dts: Option<i64>) -> Result<()> {
        let samples = std::mem::take(&mut self.pending);
        let Some(first) = samples.first() else {
            return Ok(());
        };
        let base_decode_time = first.dts.max(0) as u64;
        let keyframe_start = first.keyframe;

        let infos: Vec<SampleInfo> = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let duration = match samples.get(i + 1).map(|s| s.dts).or(next_dts) {
                    Some(next) => next.saturating_sub(sample.dts),
                    None => sample.duration,
                };
                SampleInfo {
                    duration: duration.clamp(0, u32::MAX as i64) as u32,
                    size: sample.data.len() as u32,
                    cts_offset: sample
                        .pts
                        .saturating_sub(sample.dts)
                        .clamp(0, i32::MAX as i64) as i32,
                    keyframe: sample.keyframe,
                }
            })
            .collect();

        let mut buf = BytesMut::with_capacity(256 + infos.len() * 16);
        if !self.moov_written {
            boxes::write_moov(&mut buf, &self.codec, self.timescale);
            self.moov_written = true;
        }

        let moof_offset = self.bytes_written + buf.len() as u64;
        if keyframe_start {
            if self.random_access.len() == MAX_RANDOM_ACCESS_POINTS {
                self.random_access.pop_front();
            }
            self.random_access.push_back(RandomAccessPoint {
                time: base_decode_time,
                moof_offset,
            });
        }

        boxes::write_fragment_header(
            &mut buf,
            self.sequence,
            base_decode_time,
            &infos,
            self.flags.default_base_moof,
        );
        self.sequence += 1;

        self.emit(&buf).await?;
        for sample in &samples {
            self.emit(&sample.data).await?;
        }
        if self.flush_packets {
            self.sink.flush().await.map_err(write_failed)?;
        }
        Ok(())
    }

    async fn emit(&mut self, data: &[u8]) -> Result<()> {
        self.sink.write_all(data).await.map_err(write_failed)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

fn parse_int(value: &str, key: &str) -> Result<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::OpenFailed(format!("invalid value '{}' for {}", value, key)))
}

fn write_failed(e: std::io::Error) -> Error {
    Error::WriteFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::boxes::tests::top_level_boxes;
    use super::*;
    use crate::media::CodecId;

    fn track(timebase: Timebase) -> Track {
        Track::video(
            0,
            timebase,
            CodecParameters::new(CodecId::H264, Bytes::from_static(&[1, 0x42, 0, 0x1F]))
                .with_dimensions(320, 240),
        )
    }

    fn packet(dts: i64, keyframe: bool) -> Packet {
        Packet::new(0, Bytes::from(vec![0xAB; 10]))
            .with_timestamps(Some(dts), Some(dts))
            .with_keyframe(keyframe)
    }

    fn fourccs(data: &[u8]) -> Vec<String> {
        top_level_boxes(data)
            .iter()
            .map(|(fourcc, _, _)| String::from_utf8_lossy(fourcc).into_owned())
            .collect()
    }

    #[test]
    fn test_auto_timescale() {
        assert_eq!(auto_timescale(Timebase::MILLIS), 16_000);
        assert_eq!(auto_timescale(Timebase::MPEG), 90_000);
        assert_eq!(auto_timescale(Timebase::new(1, 25)), 12_800);
    }

    #[test]
    fn test_flags_parse() {
        let flags = FragmentFlags::parse("frag_keyframe+empty_moov+default_base_moof").unwrap();
        assert!(flags.frag_keyframe);
        assert!(flags.empty_moov);
        assert!(flags.default_base_moof);
        assert!(!flags.frag_every_frame);

        let cleared = FragmentFlags::parse("+frag_keyframe+-frag_keyframe").unwrap();
        assert!(!cleared.frag_keyframe);

        assert!(matches!(
            FragmentFlags::parse("frag_keyframe+faststart"),
            Err(Error::OpenFailed(_))
        ));
    }

    #[test]
    fn test_new_consumes_known_options() {
        let mut opts = MuxOptions::streaming().set("bogus", "1");
        let muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MILLIS), &mut opts).unwrap();
        assert_eq!(opts.keys().collect::<Vec<_>>(), vec!["bogus"]);
        assert!(muxer.flush_packets);
        assert_eq!(muxer.timebase(), Timebase::new(1, 16_000));
    }

    #[test]
    fn test_new_requires_fragmentation() {
        let mut opts = MuxOptions::new();
        let result = Mp4Muxer::new(Vec::new(), &track(Timebase::MILLIS), &mut opts);
        assert!(matches!(result, Err(Error::OpenFailed(_))));
    }

    #[test]
    fn test_new_rejects_unsupported_codec() {
        let mut vp6 = track(Timebase::MILLIS);
        vp6.codec.codec = CodecId::Other(4);
        let mut opts = MuxOptions::streaming();
        assert!(matches!(
            Mp4Muxer::new(Vec::new(), &vp6, &mut opts),
            Err(Error::OpenFailed(_))
        ));
    }

    #[test]
    fn test_timescale_override() {
        let mut opts = MuxOptions::streaming().set_int("video_track_timescale", 90_000);
        let muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MILLIS), &mut opts).unwrap();
        assert_eq!(muxer.timebase(), Timebase::MPEG);
        assert!(opts.is_empty());
    }

    #[tokio::test]
    async fn test_stream_layout() {
        let mut opts = MuxOptions::streaming();
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();

        muxer.write_header().await.unwrap();
        muxer.write_packet(packet(0, true)).await.unwrap();
        muxer.write_packet(packet(3000, false)).await.unwrap();
        muxer.write_packet(packet(6000, true)).await.unwrap();
        muxer.write_trailer().await.unwrap();
        // second trailer is a no-op
        muxer.write_trailer().await.unwrap();

        assert_eq!(
            fourccs(&muxer.sink),
            vec!["ftyp", "moov", "moof", "mdat", "moof", "mdat", "mfra"]
        );
        assert_eq!(muxer.random_access.len(), 2);
        assert_eq!(muxer.random_access[1].time, 6000);
        assert_eq!(muxer.bytes_written(), muxer.sink.len() as u64);
    }

    #[tokio::test]
    async fn test_moov_deferred_without_empty_moov() {
        let mut opts = MuxOptions::new().set("movflags", "frag_every_frame");
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();

        muxer.write_header().await.unwrap();
        assert_eq!(fourccs(&muxer.sink), vec!["ftyp"]);

        muxer.write_packet(packet(0, true)).await.unwrap();
        muxer.write_packet(packet(10, false)).await.unwrap();
        assert_eq!(fourccs(&muxer.sink), vec!["ftyp", "moov", "moof", "mdat"]);
    }

    #[tokio::test]
    async fn test_rejects_bad_timestamps() {
        let mut opts = MuxOptions::streaming();
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();
        muxer.write_header().await.unwrap();

        muxer.write_packet(packet(100, true)).await.unwrap();
        assert!(matches!(
            muxer.write_packet(packet(100, false)).await,
            Err(Error::WriteFailed(_))
        ));

        let backwards = Packet::new(0, Bytes::from_static(b"x")).with_timestamps(Some(150), Some(200));
        assert!(matches!(
            muxer.write_packet(backwards).await,
            Err(Error::WriteFailed(_))
        ));

        let wrong_track = Packet::new(1, Bytes::from_static(b"x")).with_timestamps(Some(300), Some(300));
        assert!(muxer.write_packet(wrong_track).await.is_err());
    }

    #[tokio::test]
    async fn test_extreme_timestamps_do_not_overflow() {
        let mut opts = MuxOptions::streaming();
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();
        muxer.write_header().await.unwrap();

        muxer.write_packet(packet(i64::MIN, true)).await.unwrap();
        muxer.write_packet(packet(-10, true)).await.unwrap();
        muxer.write_packet(packet(i64::MAX, true)).await.unwrap();
        muxer.write_trailer().await.unwrap();

        assert_eq!(muxer.random_access.len(), 3);
        assert_eq!(muxer.random_access[2].time, i64::MAX as u64);
    }

    #[tokio::test]
    async fn test_random_access_index_is_capped() {
        let mut opts = MuxOptions::streaming();
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();
        muxer.write_header().await.unwrap();

        let total = MAX_RANDOM_ACCESS_POINTS as i64 + 10;
        for i in 0..total {
            muxer.write_packet(packet(i * 3000, true)).await.unwrap();
        }
        muxer.write_trailer().await.unwrap();

        assert_eq!(muxer.random_access.len(), MAX_RANDOM_ACCESS_POINTS);
        assert_eq!(muxer.random_access[0].time, 10 * 3000);
        assert_eq!(
            muxer.random_access.back().map(|p| p.time),
            Some((total as u64 - 1) * 3000)
        );
        assert_eq!(fourccs(&muxer.sink).last().map(String::as_str), Some("mfra"));
    }

    #[tokio::test]
    async fn test_packets_rejected_before_header() {
        let mut opts = MuxOptions::streaming();
        let mut muxer = Mp4Muxer::new(Vec::new(), &track(Timebase::MPEG), &mut opts).unwrap();
        assert!(muxer.write_packet(packet(0, true)).await.is_err());
    }
}
