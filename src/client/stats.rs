use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free delivery counters shared between the client, the dispatcher
/// and the uploader tasks.
#[derive(Debug, Default)]
pub struct ClientStats {
    enqueued: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    events_delivered: AtomicU64,
    events_failed: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ClientStats {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_sent(&self, bytes: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_events_delivered(&self, events: u64) {
        self.events_delivered.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self, events: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
    pub bytes_sent: u64,
}
