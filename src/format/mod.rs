//! Container formats
//!
//! Input formats live in a process-wide table keyed by name. The table is
//! populated once with the built-in formats; embedders can add their own
//! (a capture device, a synthetic source) through [`register_input_format`].
//! The only output format is the fragmented MP4 writer in [`mp4`].

pub mod flv;
pub mod mp4;
mod source;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::media::{Packet, Track};

pub use source::open_source;

/// A readable, demultiplexed input
#[async_trait]
pub trait Demuxer: Send {
    /// Tracks discovered while opening
    fn tracks(&self) -> &[Track];

    /// Read the next packet of any track.
    ///
    /// The upstream is expected to be endless, so running out of data is
    /// reported as an error.
    async fn read_packet(&mut self) -> Result<Packet>;

    /// Release the underlying connection
    async fn close(&mut self) {}
}

/// Factory for demuxers of one container format
#[async_trait]
pub trait InputFormat: Send + Sync {
    /// Connect to `url` and probe its tracks
    async fn open(&self, url: &str) -> Result<Box<dyn Demuxer>>;
}

type FormatTable = RwLock<HashMap<String, Arc<dyn InputFormat>>>;

static INPUT_FORMATS: OnceLock<FormatTable> = OnceLock::new();

fn table() -> &'static FormatTable {
    INPUT_FORMATS.get_or_init(|| {
        let mut formats: HashMap<String, Arc<dyn InputFormat>> = HashMap::new();
        formats.insert(flv::FORMAT_NAME.to_string(), Arc::new(flv::FlvFormat::default()));
        tracing::debug!(formats = formats.len(), "Input formats initialized");
        RwLock::new(formats)
    })
}

/// Initialize the format table. Safe to call any number of times.
pub fn setup() {
    table();
}

/// Add or replace a named input format
pub fn register_input_format(name: impl Into<String>, format: Arc<dyn InputFormat>) {
    let name = name.into();
    tracing::debug!(format = %name, "Registering input format");
    table().write().insert(name, format);
}

/// Look up an input format by name
pub fn find_input_format(name: &str) -> Option<Arc<dyn InputFormat>> {
    table().read().get(name).cloned()
}

/// Names of every registered input format, sorted
pub fn input_format_names() -> Vec<String> {
    let mut names: Vec<String> = table().read().keys().cloned().collect();
    names.sort();
    names
}
