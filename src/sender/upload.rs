use super::client::HttpSender;
use crate::buffer::QueuedEvent;
use crate::client::{Callback, ClientStats};
use crate::config::RetryAfterFn;
use crate::error::Error;
use crate::event::{Context, Timestamp};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Cap on how much of an error response body is read for logging.
const MAX_ERROR_BODY: usize = 512;

/// A batch ready for upload: the events plus the envelope metadata stamped
/// by the dispatcher at flush time.
#[derive(Debug)]
pub struct Batch {
    pub message_id: String,
    pub sent_at: Timestamp,
    pub context: Context,
    pub events: Vec<QueuedEvent>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchPayload<'a> {
    batch: Vec<&'a Value>,
    message_id: &'a str,
    sent_at: Timestamp,
    context: &'a Context,
}

impl Batch {
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&BatchPayload {
            batch: self.events.iter().map(|e| &e.payload).collect(),
            message_id: &self.message_id,
            sent_at: self.sent_at,
            context: &self.context,
        })
    }
}

/// Uploads batches over HTTP with bounded retries and notifies the callback
/// once per event.
pub struct Uploader {
    pub(crate) sender: HttpSender,
    pub(crate) attempts: usize,
    pub(crate) retry_after: RetryAfterFn,
    pub(crate) callback: Option<Arc<dyn Callback>>,
    pub(crate) stats: Arc<ClientStats>,
    pub(crate) shutdown: CancellationToken,
}

impl Uploader {
    /// Drives a batch to completion: success, permanent rejection, or retry
    /// exhaustion. Never returns an error; outcomes surface through the
    /// callback and the logs.
    pub async fn upload(&self, batch: Batch) {
        let payload = match batch.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!(batch_id = %batch.message_id, error = %err, "failed to serialize batch");
                self.notify_failure(batch.events, &Error::Json(err));
                return;
            }
        };

        let count = batch.events.len();
        let bytes = payload.len();
        let mut last_error = Error::Closed;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                let pause = (self.retry_after)(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.shutdown.cancelled() => {
                        warn!(
                            batch_id = %batch.message_id,
                            events = count,
                            "client closed while waiting to retry, dropping batch"
                        );
                        self.notify_failure(batch.events, &last_error);
                        return;
                    }
                }
            }

            match self.sender.send(payload.clone()).await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() < 400 {
                        debug!(
                            batch_id = %batch.message_id,
                            events = count,
                            bytes,
                            status = status.as_u16(),
                            "batch uploaded"
                        );
                        self.stats.record_batch_sent(bytes as u64);
                        self.notify_success(batch.events);
                        return;
                    }

                    let body = read_bounded(response).await;
                    error!(
                        batch_id = %batch.message_id,
                        status = status.as_u16(),
                        body = %body,
                        "batch rejected"
                    );

                    let retriable =
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    last_error = Error::Upload {
                        status: status.as_u16(),
                        body,
                    };
                    if !retriable {
                        self.notify_failure(batch.events, &last_error);
                        return;
                    }
                }
                Err(err) => {
                    warn!(
                        batch_id = %batch.message_id,
                        attempt = attempt + 1,
                        error = %err,
                        "batch upload failed"
                    );
                    last_error = Error::Network(err);
                }
            }
        }

        error!(
            batch_id = %batch.message_id,
            events = count,
            attempts = self.attempts,
            "dropping batch, retries exhausted"
        );
        self.notify_failure(batch.events, &last_error);
    }

    /// Fails every event of a batch without attempting an upload. Used when
    /// the saturation policy refuses to launch.
    pub fn reject(&self, events: Vec<QueuedEvent>, error: &Error) {
        self.notify_failure(events, error);
    }

    fn notify_success(&self, events: Vec<QueuedEvent>) {
        self.stats.record_events_delivered(events.len() as u64);
        if let Some(callback) = &self.callback {
            for queued in events {
                callback.on_success(queued.event);
            }
        }
    }

    fn notify_failure(&self, events: Vec<QueuedEvent>, error: &Error) {
        self.stats.record_batch_failed(events.len() as u64);
        if let Some(callback) = &self.callback {
            for queued in events {
                callback.on_failure(queued.event, error);
            }
        }
    }
}

/// Reads at most `MAX_ERROR_BODY` bytes of a response body.
async fn read_bounded(mut response: reqwest::Response) -> String {
    let mut collected = Vec::new();
    while collected.len() < MAX_ERROR_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
            _ => break,
        }
    }
    collected.truncate(MAX_ERROR_BODY);
    String::from_utf8_lossy(&collected).into_owned()
}
