//! Shared test harness: a hand-fed input format, capturing sinks and MP4
//! inspection helpers.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use fanmux::format::{self, Demuxer, InputFormat};
use fanmux::media::{CodecId, CodecParameters, MediaKind, Packet, Timebase, Track};
use fanmux::{Error, Result};

pub const VIDEO_TRACK: usize = 0;
pub const AUDIO_TRACK: usize = 1;

/// Input whose packets are pushed by the test one at a time
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

#[derive(Default)]
struct SourceInner {
    feed: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Source {
    /// Register a fresh source under `name`
    pub fn register(name: &str) -> Self {
        let inner = Arc::new(SourceInner::default());
        format::register_input_format(name, Arc::new(SyntheticFormat(Arc::clone(&inner))));
        Self { inner }
    }

    /// Push a packet to the currently open demuxer
    pub fn feed(&self, packet: Packet) {
        let feed = self.inner.feed.lock();
        let sender = feed.as_ref().expect("no input open");
        sender.send(packet).expect("demuxer gone");
    }

    /// End the current input; the next read fails
    pub fn finish(&self) {
        self.inner.feed.lock().take();
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }
}

struct SyntheticFormat(Arc<SourceInner>);

#[async_trait]
impl InputFormat for SyntheticFormat {
    async fn open(&self, _url: &str) -> Result<Box<dyn Demuxer>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.feed.lock() = Some(tx);

        let active = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_active.fetch_max(active, Ordering::SeqCst);
        self.0.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticDemuxer {
            rx,
            inner: Arc::clone(&self.0),
            tracks: vec![video_track(), audio_track()],
        }))
    }
}

struct SyntheticDemuxer {
    rx: mpsc::UnboundedReceiver<Packet>,
    inner: Arc<SourceInner>,
    tracks: Vec<Track>,
}

#[async_trait]
impl Demuxer for SyntheticDemuxer {
    fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    async fn read_packet(&mut self) -> Result<Packet> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::ReadFailed("end of stream".into()))
    }
}

impl Drop for SyntheticDemuxer {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn video_track() -> Track {
    Track::video(
        VIDEO_TRACK,
        Timebase::MPEG,
        CodecParameters::new(
            CodecId::H264,
            Bytes::from_static(&[0x01, 0x42, 0x00, 0x1F, 0xFF, 0xE0, 0x00]),
        )
        .with_dimensions(320, 240),
    )
}

fn audio_track() -> Track {
    Track {
        index: AUDIO_TRACK,
        kind: MediaKind::Audio,
        timebase: Timebase::MILLIS,
        codec: CodecParameters::new(CodecId::Other(10), Bytes::new()),
    }
}

/// Keyframe video packet with equal PTS and DTS
pub fn video(dts: i64) -> Packet {
    Packet::new(VIDEO_TRACK, Bytes::from(vec![0x65; 32]))
        .with_timestamps(Some(dts), Some(dts))
        .with_keyframe(true)
}

pub fn audio(ts: i64) -> Packet {
    Packet::new(AUDIO_TRACK, Bytes::from_static(&[0x21, 0x00]))
        .with_timestamps(Some(ts), Some(ts))
}

/// Payload owner that counts live instances
struct Tracked {
    data: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for Tracked {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts payload allocations that are still referenced somewhere
#[derive(Clone, Default)]
pub struct PayloadCounter {
    live: Arc<AtomicUsize>,
}

impl PayloadCounter {
    pub fn video(&self, dts: i64) -> Packet {
        self.live.fetch_add(1, Ordering::SeqCst);
        let owner = Tracked {
            data: vec![0x41; 64],
            live: Arc::clone(&self.live),
        };
        Packet::new(VIDEO_TRACK, Bytes::from_owner(owner))
            .with_timestamps(Some(dts), Some(dts))
            .with_keyframe(true)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Sink keeping everything written, optionally failing past a byte budget.
/// Every write attempt is recorded, including failed ones.
#[derive(Clone, Default)]
pub struct CaptureSink {
    state: Arc<CaptureState>,
}

#[derive(Default)]
struct CaptureState {
    data: Mutex<Vec<u8>>,
    attempts: Mutex<Vec<Vec<u8>>>,
    fail_after: Mutex<Option<usize>>,
    shutdown: AtomicBool,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `limit` bytes, then fail every write
    pub fn failing_after(limit: usize) -> Self {
        let sink = Self::default();
        *sink.state.fail_after.lock() = Some(limit);
        sink
    }

    pub fn boxed(&self) -> fanmux::BoxedSink {
        Box::new(self.clone())
    }

    pub fn data(&self) -> Vec<u8> {
        self.state.data.lock().clone()
    }

    pub fn attempts(&self) -> Vec<Vec<u8>> {
        self.state.attempts.lock().clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for CaptureSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.state.attempts.lock().push(buf.to_vec());
        let mut data = self.state.data.lock();
        if let Some(limit) = *self.state.fail_after.lock() {
            if data.len() + buf.len() > limit {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink failed")));
            }
        }
        data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.state.shutdown.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Complete top-level boxes as (fourcc, offset, size)
pub fn boxes(data: &[u8]) -> Vec<([u8; 4], usize, usize)> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        if size < 8 || offset + size > data.len() {
            break;
        }
        let fourcc: [u8; 4] = data[offset + 4..offset + 8].try_into().unwrap();
        out.push((fourcc, offset, size));
        offset += size;
    }
    out
}

pub fn count_boxes(data: &[u8], fourcc: &[u8; 4]) -> usize {
    boxes(data).iter().filter(|(f, _, _)| f == fourcc).count()
}

/// Base decode time of every fragment, in order
pub fn decode_times(data: &[u8]) -> Vec<u64> {
    boxes(data)
        .iter()
        .filter(|(f, _, _)| f == b"moof")
        .filter_map(|&(_, offset, size)| {
            let moof = &data[offset..offset + size];
            let pos = moof.windows(4).position(|w| w == b"tfdt")?;
            let version = moof[pos + 4];
            let value = &moof[pos + 8..];
            Some(if version == 1 {
                u64::from_be_bytes(value[..8].try_into().unwrap())
            } else {
                u32::from_be_bytes(value[..4].try_into().unwrap()) as u64
            })
        })
        .collect()
}

/// Composition offsets of every sample, in order
pub fn composition_offsets(data: &[u8]) -> Vec<i32> {
    let mut out = Vec::new();
    for &(fourcc, offset, size) in &boxes(data) {
        if &fourcc != b"moof" {
            continue;
        }
        let moof = &data[offset..offset + size];
        let Some(pos) = moof.windows(4).position(|w| w == b"trun") else {
            continue;
        };
        let count = u32::from_be_bytes(moof[pos + 8..pos + 12].try_into().unwrap()) as usize;
        // count, data offset, then 16-byte entries ending with the cts offset
        let entries = pos + 16;
        for i in 0..count {
            let at = entries + i * 16 + 12;
            out.push(i32::from_be_bytes(moof[at..at + 4].try_into().unwrap()));
        }
    }
    out
}

/// Poll `check` until it holds, failing the test after a few seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Await `fut`, failing the test after a few seconds
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
