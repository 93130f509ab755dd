//! Input session
//!
//! Owns the one open demuxer and the video track selected from it. Packets
//! of every other track are read and thrown away here.

use crate::error::{Error, Result};
use crate::format::{self, Demuxer};
use crate::media::{Packet, Track};

/// Outcome of a single read
#[derive(Debug)]
pub enum ReadOutcome {
    /// A packet of the selected video track
    Video(Packet),
    /// A packet of some other track was read and discarded
    Skipped,
}

/// An open upstream input
pub struct InputSession {
    demuxer: Box<dyn Demuxer>,
    track: Track,
    closed: bool,
}

impl InputSession {
    /// Resolve `format_name`, connect to `url` and select the first video track
    pub async fn open(format_name: &str, url: &str) -> Result<Self> {
        let input_format = format::find_input_format(format_name)
            .ok_or_else(|| Error::OpenFailed(format!("input format '{}' not found", format_name)))?;

        let mut demuxer = input_format.open(url).await?;

        for track in demuxer.tracks() {
            tracing::debug!(
                url = %url,
                index = track.index,
                kind = ?track.kind,
                codec = %track.codec.codec,
                timebase = %track.timebase,
                width = track.codec.width,
                height = track.codec.height,
                "Input track"
            );
        }

        let Some(track) = demuxer.tracks().iter().find(|t| t.is_video()).cloned() else {
            demuxer.close().await;
            return Err(Error::NoVideoTrack);
        };

        tracing::info!(
            url = %url,
            format = %format_name,
            track = track.index,
            codec = %track.codec.codec,
            "Input opened"
        );

        Ok(Self {
            demuxer,
            track,
            closed: false,
        })
    }

    /// The selected video track
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Read one packet, discarding those of other tracks
    pub async fn read_next(&mut self) -> Result<ReadOutcome> {
        if self.closed {
            return Err(Error::ReadFailed("input session closed".into()));
        }

        let packet = self.demuxer.read_packet().await.map_err(|e| match e {
            Error::ReadFailed(_) => e,
            other => Error::ReadFailed(other.to_string()),
        })?;

        if packet.track_index == self.track.index {
            Ok(ReadOutcome::Video(packet))
        } else {
            Ok(ReadOutcome::Skipped)
        }
    }

    /// Release the demuxer. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.demuxer.close().await;
        tracing::info!("Input closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
