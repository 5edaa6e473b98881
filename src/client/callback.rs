use crate::error::Error;
use crate::event::Event;

/// Observer for per-event delivery outcomes.
///
/// Invoked from uploader tasks, so calls may arrive on multiple threads in
/// parallel and in no particular order. Implementations must be short; a
/// slow callback stalls the uploader that invoked it.
pub trait Callback: Send + Sync + 'static {
    /// The event was accepted by the sink.
    fn on_success(&self, event: Event);

    /// The event was dropped: the sink rejected it permanently or every
    /// retry failed. `error` is the last error observed.
    fn on_failure(&self, event: Event, error: &Error);
}
