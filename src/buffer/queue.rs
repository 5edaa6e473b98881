use crate::event::Event;
use serde_json::Value;

/// An event that passed validation and stamping, paired with its serialized
/// form and encoded byte size. Serialization happens once, at enqueue time,
/// so retries ship identical bytes.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: Event,
    pub payload: Value,
    pub size: usize,
}

/// Accumulates serialized events into batches bounded by an event count and
/// an encoded byte total.
///
/// Owned exclusively by the dispatcher task; not a concurrency primitive.
#[derive(Debug)]
pub struct MessageQueue {
    pending: Vec<QueuedEvent>,
    bytes: usize,
    max_events: usize,
    max_bytes: usize,
}

impl MessageQueue {
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_events),
            bytes: 0,
            max_events,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Appends an event, returning a full batch when a threshold is crossed.
    ///
    /// When the incoming event would push the byte total past the limit, the
    /// current pending set is returned and the incoming event seeds the next
    /// batch, never dropped.
    pub fn push(&mut self, event: QueuedEvent) -> Option<Vec<QueuedEvent>> {
        if !self.pending.is_empty() && self.bytes + event.size > self.max_bytes {
            let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.max_events));
            self.bytes = event.size;
            self.pending.push(event);
            return Some(batch);
        }

        self.bytes += event.size;
        self.pending.push(event);

        if self.pending.len() >= self.max_events {
            return self.flush();
        }
        None
    }

    /// Returns the pending set if it is non-empty.
    pub fn flush(&mut self) -> Option<Vec<QueuedEvent>> {
        if self.pending.is_empty() {
            return None;
        }
        self.bytes = 0;
        Some(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.max_events),
        ))
    }
}
