//! Relay counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Live counters updated by the relay task
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    inputs_opened: AtomicU64,
    inputs_closed: AtomicU64,
    packets_read: AtomicU64,
    packets_skipped: AtomicU64,
    bytes_read: AtomicU64,
    clients_admitted: AtomicU64,
    clients_cut: AtomicU64,
    clients_removed: AtomicU64,
    active_clients: AtomicUsize,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            inputs_opened: AtomicU64::new(0),
            inputs_closed: AtomicU64::new(0),
            packets_read: AtomicU64::new(0),
            packets_skipped: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            clients_admitted: AtomicU64::new(0),
            clients_cut: AtomicU64::new(0),
            clients_removed: AtomicU64::new(0),
            active_clients: AtomicUsize::new(0),
        }
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn input_opened(&self) {
        self.inputs_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn input_closed(&self) {
        self.inputs_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_read(&self, size: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn packet_skipped(&self) {
        self.packets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn client_admitted(&self) {
        self.clients_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn client_cut(&self) {
        self.clients_cut.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn client_removed(&self) {
        self.clients_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_active_clients(&self, count: usize) {
        self.active_clients.store(count, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            uptime: self.started_at.elapsed(),
            inputs_opened: self.inputs_opened.load(Ordering::Relaxed),
            inputs_closed: self.inputs_closed.load(Ordering::Relaxed),
            packets_read: self.packets_read.load(Ordering::Relaxed),
            packets_skipped: self.packets_skipped.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            clients_admitted: self.clients_admitted.load(Ordering::Relaxed),
            clients_cut: self.clients_cut.load(Ordering::Relaxed),
            clients_removed: self.clients_removed.load(Ordering::Relaxed),
            active_clients: self.active_clients.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub uptime: Duration,
    /// Upstream connections opened
    pub inputs_opened: u64,
    /// Upstream connections closed
    pub inputs_closed: u64,
    /// Video packets read and fanned out
    pub packets_read: u64,
    /// Packets of other tracks discarded
    pub packets_skipped: u64,
    /// Video payload bytes read
    pub bytes_read: u64,
    pub clients_admitted: u64,
    /// Clients dropped for a full or closed queue
    pub clients_cut: u64,
    /// Clients removed from the active set for any reason
    pub clients_removed: u64,
    pub active_clients: usize,
}

impl RelayStatsSnapshot {
    /// Whether an upstream connection is currently open
    pub fn input_open(&self) -> bool {
        self.inputs_opened > self.inputs_closed
    }

    /// Average video bitrate since the relay started, in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_read * 8) / secs
        } else {
            0
        }
    }
}
