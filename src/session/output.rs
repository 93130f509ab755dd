//! Output session
//!
//! One fragmented MP4 writer bound to one client sink. The header goes out
//! as soon as the session opens; the trailer is attempted exactly once when
//! it closes.

use crate::error::{Error, Result};
use crate::format::mp4::{self, Mp4Muxer, MuxOptions};
use crate::media::{rescale, Packet, Timebase, Track};
use crate::sink::BoxedSink;

use super::repair::TimestampRepair;

/// Per-client container writer
pub struct OutputSession {
    muxer: Mp4Muxer<BoxedSink>,
    timebase: Timebase,
    repair: TimestampRepair,
    verbose: bool,
    closed: bool,
}

impl OutputSession {
    /// Open a writer for `reference` on `sink` and write the container header.
    ///
    /// Every entry of `options` must be understood by the writer; anything
    /// left over fails with [`Error::OptionRejected`] before a byte is written.
    pub async fn open(
        container_format: &str,
        sink: BoxedSink,
        reference: &Track,
        options: &MuxOptions,
    ) -> Result<Self> {
        if container_format != mp4::FORMAT_NAME {
            return Err(Error::OpenFailed(format!(
                "output format '{}' not found",
                container_format
            )));
        }

        let mut remaining = options.clone();
        let mut muxer = Mp4Muxer::new(sink, reference, &mut remaining)?;
        if !remaining.is_empty() {
            let keys: Vec<&str> = remaining.keys().collect();
            return Err(Error::OptionRejected(keys.join(",")));
        }

        muxer
            .write_header()
            .await
            .map_err(|e| Error::OpenFailed(format!("could not write header: {}", e)))?;

        let timebase = muxer.timebase();
        tracing::debug!(
            timebase = %timebase,
            options = %options,
            "Output opened"
        );

        Ok(Self {
            muxer,
            timebase,
            repair: TimestampRepair::new(),
            verbose: false,
            closed: false,
        })
    }

    /// Log every packet before and after rescaling
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Output time base
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// DTS of the last write attempt, in output units
    pub fn last_dts(&self) -> Option<i64> {
        self.repair.last_dts()
    }

    /// Repair, rescale and write one packet.
    ///
    /// Failures belong to this session only.
    pub async fn write(&mut self, mut packet: Packet, input_timebase: Timebase) -> Result<()> {
        if self.closed {
            return Err(Error::WriteFailed("output session closed".into()));
        }
        if self.verbose {
            log_packet("in", &packet, input_timebase);
        }

        let pts = packet.pts.map(|v| rescale(v, input_timebase, self.timebase));
        let dts = packet.dts.map(|v| rescale(v, input_timebase, self.timebase));
        let (pts, dts) = self.repair.apply(pts, dts);

        packet.track_index = 0;
        packet.pts = Some(pts);
        packet.dts = Some(dts);
        packet.duration = rescale(packet.duration, input_timebase, self.timebase);
        packet.position = None;

        if self.verbose {
            log_packet("out", &packet, self.timebase);
        }

        let result = self.muxer.write_packet(packet).await;
        self.repair.record(dts);
        result
    }

    /// Write the trailer and shut the sink down. Only the first call acts;
    /// failures are logged.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.muxer.write_trailer().await {
            tracing::warn!(error = %e, "Failed to write trailer");
        }
        if let Err(e) = self.muxer.shutdown().await {
            tracing::debug!(error = %e, "Failed to shut down sink");
        }
        tracing::debug!(bytes = self.muxer.bytes_written(), "Output closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn log_packet(tag: &str, packet: &Packet, timebase: Timebase) {
    tracing::trace!(
        tag = tag,
        pts = ?packet.pts,
        pts_time = packet.pts.map(|v| timebase.seconds(v)).unwrap_or(f64::NAN),
        dts = ?packet.dts,
        dts_time = packet.dts.map(|v| timebase.seconds(v)).unwrap_or(f64::NAN),
        duration = packet.duration,
        duration_time = timebase.seconds(packet.duration),
        track = packet.track_index,
        "Packet"
    );
}
