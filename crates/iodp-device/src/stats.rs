use std::sync::atomic::{AtomicU64, Ordering};

use iodp_frame::ParserStats;

/// Point-in-time copy of a device's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Bytes read from the link into the ingress ring.
    pub bytes_received: u64,
    /// Frames that passed the integrity check and were routed.
    pub frames_routed: u64,
    /// Complete frames dropped on a bad checksum or an unusable kind.
    pub frames_dropped: u64,
    /// Bytes the parser skipped while hunting for a sync word.
    pub skipped_bytes: u64,
    /// Frames the parser abandoned on a bad prefix.
    pub rejected_frames: u64,
    /// Inbound requests answered or applied.
    pub requests_served: u64,
    /// Replies handed to a waiting class buffer.
    pub replies_delivered: u64,
    /// Replies thrown away because their class buffer was full.
    pub replies_discarded: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    bytes_received: AtomicU64,
    frames_routed: AtomicU64,
    frames_dropped: AtomicU64,
    skipped_bytes: AtomicU64,
    rejected_frames: AtomicU64,
    requests_served: AtomicU64,
    replies_delivered: AtomicU64,
    replies_discarded: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn received(&self, n: usize) {
        bump(&self.bytes_received, n as u64);
    }

    pub(crate) fn routed(&self) {
        bump(&self.frames_routed, 1);
    }

    pub(crate) fn dropped(&self) {
        bump(&self.frames_dropped, 1);
    }

    pub(crate) fn served(&self) {
        bump(&self.requests_served, 1);
    }

    pub(crate) fn delivered(&self) {
        bump(&self.replies_delivered, 1);
    }

    pub(crate) fn discarded(&self) {
        bump(&self.replies_discarded, 1);
    }

    /// Mirror the parser's own counters; there is one parser per device.
    pub(crate) fn sync_parser(&self, stats: ParserStats) {
        self.skipped_bytes
            .store(stats.skipped_bytes, Ordering::Relaxed);
        self.rejected_frames
            .store(stats.rejected_frames, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DeviceStats {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        DeviceStats {
            bytes_received: get(&self.bytes_received),
            frames_routed: get(&self.frames_routed),
            frames_dropped: get(&self.frames_dropped),
            skipped_bytes: get(&self.skipped_bytes),
            rejected_frames: get(&self.rejected_frames),
            requests_served: get(&self.requests_served),
            replies_delivered: get(&self.replies_delivered),
            replies_discarded: get(&self.replies_discarded),
        }
    }
}
