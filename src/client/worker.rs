use super::ClientStats;
use crate::buffer::{MessageQueue, QueuedEvent};
use crate::config::{NowFn, SaturationPolicy, UidFn};
use crate::error::Error;
use crate::event::Context;
use crate::sender::{Batch, Uploader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The dispatcher: one long-lived task per client that owns the queue and
/// schedules uploads.
pub(crate) struct Worker {
    pub rx: mpsc::Receiver<QueuedEvent>,
    pub queue: MessageQueue,
    pub interval: Duration,
    pub uploader: Arc<Uploader>,
    pub semaphore: Arc<Semaphore>,
    pub saturation: SaturationPolicy,
    pub shutdown: CancellationToken,
    pub context: Context,
    pub now: NowFn,
    pub uid: UidFn,
    pub stats: Arc<ClientStats>,
}

impl Worker {
    /// The consumer loop. Selects between incoming events, the periodic
    /// flush tick, finished uploads and the shutdown signal; on shutdown it
    /// closes the input channel, drains what is buffered, flushes and waits
    /// for every in-flight upload.
    pub(crate) async fn run(mut self) {
        let mut uploads = JoinSet::new();
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(queued) => {
                        debug!(
                            kind = queued.event.kind(),
                            pending = self.queue.len() + 1,
                            "event received"
                        );
                        if let Some(events) = self.queue.push(queued) {
                            self.dispatch(events, &mut uploads).await;
                        }
                    }
                    // Every producer handle is gone: the client was dropped
                    // without close. Flush what we have and stop.
                    None => break,
                },

                _ = ticker.tick() => {
                    if let Some(events) = self.queue.flush() {
                        debug!(interval = ?self.interval, events = events.len(), "interval reached, flushing");
                        self.dispatch(events, &mut uploads).await;
                    }
                }

                Some(finished) = uploads.join_next(), if !uploads.is_empty() => {
                    reap(finished, &self.stats);
                }

                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, draining pending events");
                    self.rx.close();
                    while let Some(queued) = self.rx.recv().await {
                        if let Some(events) = self.queue.push(queued) {
                            self.dispatch(events, &mut uploads).await;
                        }
                    }
                    break;
                }
            }
        }

        if let Some(events) = self.queue.flush() {
            self.dispatch(events, &mut uploads).await;
        }
        while let Some(finished) = uploads.join_next().await {
            reap(finished, &self.stats);
        }
        debug!("dispatcher stopped");
    }

    /// Hands a batch to the upload pool according to the saturation policy.
    async fn dispatch(&self, events: Vec<QueuedEvent>, uploads: &mut JoinSet<()>) {
        let batch = Batch {
            message_id: (self.uid)(),
            sent_at: (self.now)().into(),
            context: self.context.clone(),
            events,
        };

        let permit = match self.saturation {
            SaturationPolicy::Block => match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore is never closed while the worker lives.
                Err(_) => return,
            },
            SaturationPolicy::FailBatch => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    error!(
                        events = batch.events.len(),
                        "upload pool saturated, failing batch"
                    );
                    self.uploader.reject(batch.events, &Error::TooManyRequests);
                    return;
                }
            },
        };

        let uploader = Arc::clone(&self.uploader);
        uploads.spawn(async move {
            let _permit = permit;
            uploader.upload(batch).await;
        });
    }
}

/// Logs upload tasks that died instead of completing. A panic inside an
/// upload must never take down the dispatcher.
fn reap(finished: Result<(), tokio::task::JoinError>, stats: &ClientStats) {
    if let Err(err) = finished {
        if err.is_panic() {
            error!(error = %err, "upload task panicked");
            stats.record_batch_failed(0);
        }
    }
}
