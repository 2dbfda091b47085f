use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Snapshot of tunnel counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatsSnapshot {
    /// Frames submitted to the reliable channel
    pub frames_sent: u64,
    /// Frames dispatched from the reliable channel
    pub frames_received: u64,
    /// Payload bytes read from local sockets
    pub bytes_sent: u64,
    /// Payload bytes delivered towards local sockets
    pub bytes_received: u64,
    /// Local connections opened (accepted or connected)
    pub connections_opened: u64,
    /// Local connections torn down
    pub connections_closed: u64,
    /// Reliable channel re-initializations
    pub channel_reinits: u64,
    /// Packet transport handshake resets
    pub handshake_resets: u64,
    /// Currently active connections
    pub active_connections: u64,
    /// Timestamp when the tracker was created (Unix timestamp)
    pub start_time: u64,
}

/// Statistics tracker for one tunnel session
#[derive(Debug, Clone)]
pub struct TunnelStats {
    frames_sent: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    connections_opened: Arc<AtomicU64>,
    connections_closed: Arc<AtomicU64>,
    channel_reinits: Arc<AtomicU64>,
    handshake_resets: Arc<AtomicU64>,
    start_time: u64,
}

impl TunnelStats {
    pub fn new() -> Self {
        Self {
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_received: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            connections_opened: Arc::new(AtomicU64::new(0)),
            connections_closed: Arc::new(AtomicU64::new(0)),
            channel_reinits: Arc::new(AtomicU64::new(0)),
            handshake_resets: Arc::new(AtomicU64::new(0)),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Record one frame submitted with `payload` bytes
    pub fn frame_sent(&self, payload: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(payload as u64, Ordering::Relaxed);
    }

    /// Record one frame dispatched with `payload` bytes
    pub fn frame_received(&self, payload: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(payload as u64, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_reinit(&self) {
        self.channel_reinits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_reset(&self) {
        self.handshake_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self, active_connections: usize) -> TunnelStatsSnapshot {
        TunnelStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            channel_reinits: self.channel_reinits.load(Ordering::Relaxed),
            handshake_resets: self.handshake_resets.load(Ordering::Relaxed),
            active_connections: active_connections as u64,
            start_time: self.start_time,
        }
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}
